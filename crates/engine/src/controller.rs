// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Auto-sync controller: drains the queue and pulls server state.
//!
//! A sync run walks `idle -> draining-queue -> pulling-remote -> settling
//! -> idle`, with `failed` reachable from any phase on an unrecoverable
//! error (auth expiry). Runs are single-flight: an in-flight flag rejects
//! overlapping triggers, and a trigger that arrives mid-run coalesces into
//! exactly one follow-up run after the current one completes.
//!
//! Lock discipline: work is collected under the store lock, the lock is
//! released across every network await, and results are applied under a
//! fresh lock. The store mutex is never held across an await.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use beat_core::{EntityKind, LocalStore, OpKind, QueueEntry};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::progress::{NoopSink, ProgressSink, ProgressTracker};
use crate::remote::{ApiRequest, HttpApi, RemoteApi};

/// Sync phase values for the atomic phase field.
pub const PHASE_IDLE: u8 = 0;
pub const PHASE_DRAINING: u8 = 1;
pub const PHASE_PULLING: u8 = 2;
pub const PHASE_SETTLING: u8 = 3;
pub const PHASE_FAILED: u8 = 4;

/// Run state visible to both the background task and callers.
///
/// Uses atomic fields for lock-free reads from status queries.
pub struct SharedSyncState {
    /// Current phase (atomic for lock-free reads).
    phase: AtomicU8,
    /// Whether a run is in flight (the single-flight guard).
    in_flight: AtomicBool,
    /// Whether a trigger arrived mid-run and one re-run is owed.
    rerun_pending: AtomicBool,
}

impl SharedSyncState {
    /// Create a new state initialized to idle.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(PHASE_IDLE),
            in_flight: AtomicBool::new(false),
            rerun_pending: AtomicBool::new(false),
        }
    }

    /// Get the current phase.
    pub fn phase(&self) -> u8 {
        self.phase.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: u8) {
        self.phase.store(phase, Ordering::Release);
    }

    /// Whether a run is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Try to claim the single-flight slot. Returns false if a run is
    /// already in flight (the caller's trigger is then coalesced).
    fn try_begin(&self) -> bool {
        !self.in_flight.swap(true, Ordering::AcqRel)
    }

    fn finish(&self) {
        self.set_phase(PHASE_IDLE);
        self.in_flight.store(false, Ordering::Release);
    }

    fn request_rerun(&self) {
        self.rerun_pending.store(true, Ordering::Release);
    }

    fn take_rerun(&self) -> bool {
        self.rerun_pending.swap(false, Ordering::AcqRel)
    }

    /// Get a human-readable phase string.
    pub fn phase_string(&self) -> &'static str {
        match self.phase() {
            PHASE_IDLE => "idle",
            PHASE_DRAINING => "draining-queue",
            PHASE_PULLING => "pulling-remote",
            PHASE_SETTLING => "settling",
            PHASE_FAILED => "failed",
            _ => "unknown",
        }
    }
}

impl Default for SharedSyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to every individual remote call. A stuck call is
    /// treated as a transient failure rather than wedging the run.
    pub request_timeout: Duration,
    /// How long connectivity must stay online before a regained-network
    /// trigger fires (flap debouncing).
    pub settle_window: Duration,
    /// Background periodic sync interval.
    pub poll_interval: Duration,
    /// Maximum failure messages carried in the end-of-run summary.
    pub summary_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            request_timeout: Duration::from_secs(10),
            settle_window: Duration::from_secs(2),
            poll_interval: Duration::from_secs(300),
            summary_limit: 3,
        }
    }
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Entries acknowledged and removed from the queue.
    pub delivered: usize,
    /// Entries left queued after transient failures (including entries
    /// skipped to preserve per-entity ordering).
    pub kept: usize,
    /// Entries permanently rejected and dropped.
    pub dropped: usize,
    /// Records written from server snapshots.
    pub pulled: usize,
    /// First few failure descriptions, for the summary message.
    pub failures: Vec<String>,
}

impl CycleReport {
    /// Fold a follow-up cycle's counts into this report.
    fn absorb(&mut self, other: CycleReport) {
        self.delivered += other.delivered;
        self.kept = other.kept;
        self.dropped += other.dropped;
        self.pulled += other.pulled;
        self.failures.extend(other.failures);
    }

    /// One user-facing summary line for the whole run. `None` when nothing
    /// went wrong.
    pub fn summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(format!(
            "{} change(s) could not be synced: {}",
            self.dropped.max(self.failures.len()),
            self.failures.join("; ")
        ))
    }
}

/// Handle returned by [`AutoSyncController::start_auto_sync`]; dropping it
/// does not stop the task, call [`AutoSyncHandle::stop`].
pub struct AutoSyncHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Stop the background sync task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Outcome of delivering one queue entry.
enum Delivery {
    /// Acknowledged; server id present when the response carried one.
    Acked { remote_id: Option<i64> },
    /// Try again next cycle.
    Transient(String),
    /// Permanently rejected.
    Rejected(String),
    /// The whole run must abort.
    AuthExpired,
}

/// The mirrored entity table an operation kind settles into, if any.
fn mirrored_kind(kind: OpKind) -> Option<EntityKind> {
    match kind {
        OpKind::CreateVisitPlan => Some(EntityKind::VisitPlan),
        OpKind::CheckIn | OpKind::CheckOut => Some(EntityKind::VisitPlan),
        OpKind::CreateCustomer => Some(EntityKind::Customer),
        OpKind::CreateGeoMapping => Some(EntityKind::GeoMapping),
        OpKind::CreateStockAdjustment => None,
    }
}

/// Whether the operation creates its entity (the ack body carries the new
/// server id) rather than mutating an existing one.
fn is_creation(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::CreateVisitPlan
            | OpKind::CreateCustomer
            | OpKind::CreateGeoMapping
            | OpKind::CreateStockAdjustment
    )
}

/// Snapshot endpoint per mirrored kind.
fn pull_endpoint(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::VisitPlan => "/api/visit-plans",
        EntityKind::Customer => "/api/customers",
        EntityKind::GeoMapping => "/api/geo-mappings",
    }
}

/// Local id prefix for records first seen in a snapshot.
fn local_id_prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::VisitPlan => "vp",
        EntityKind::Customer => "cus",
        EntityKind::GeoMapping => "geo",
    }
}

/// Orchestrates queue drains and remote pulls.
pub struct AutoSyncController<A: RemoteApi = HttpApi> {
    store: Arc<Mutex<LocalStore>>,
    api: Arc<A>,
    connectivity: Arc<ConnectivityMonitor>,
    sink: Arc<dyn ProgressSink>,
    config: EngineConfig,
    state: Arc<SharedSyncState>,
}

// Clones share everything, including the single-flight state: a clone is a
// handle onto the same controller, not an independent one.
impl<A: RemoteApi> Clone for AutoSyncController<A> {
    fn clone(&self) -> Self {
        AutoSyncController {
            store: Arc::clone(&self.store),
            api: Arc::clone(&self.api),
            connectivity: Arc::clone(&self.connectivity),
            sink: Arc::clone(&self.sink),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<A: RemoteApi + 'static> AutoSyncController<A> {
    /// Create a controller with a no-op progress sink.
    pub fn new(
        store: Arc<Mutex<LocalStore>>,
        api: Arc<A>,
        connectivity: Arc<ConnectivityMonitor>,
        config: EngineConfig,
    ) -> Self {
        Self::with_sink(store, api, connectivity, config, Arc::new(NoopSink))
    }

    /// Create a controller with an injected progress/message sink.
    pub fn with_sink(
        store: Arc<Mutex<LocalStore>>,
        api: Arc<A>,
        connectivity: Arc<ConnectivityMonitor>,
        config: EngineConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        AutoSyncController {
            store,
            api,
            connectivity,
            sink,
            config,
            state: Arc::new(SharedSyncState::new()),
        }
    }

    /// Shared run state, for status displays.
    pub fn state(&self) -> Arc<SharedSyncState> {
        Arc::clone(&self.state)
    }

    /// Current reachability, as seen by the monitor.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Number of queued operations awaiting delivery.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.lock_store().queue_len()?)
    }

    /// Record an operation for delivery. Durable before return; never
    /// touches the network.
    pub fn add_to_queue(&self, entry: &QueueEntry) -> SyncResult<()> {
        self.lock_store().enqueue(entry)?;
        Ok(())
    }

    /// Destructive wipe of one mirrored table.
    ///
    /// Refused while a run is in flight, and while queued operations still
    /// reference records of this kind: a record must never be deleted with
    /// an unresolved queue entry pointing at it.
    pub fn invalidate(&self, kind: EntityKind) -> SyncResult<()> {
        if self.state.is_in_flight() {
            return Err(SyncError::SyncInFlight);
        }

        let store = self.lock_store();
        let count = store
            .pending_entries()?
            .iter()
            .filter(|e| mirrored_kind(e.kind) == Some(kind))
            .count();
        if count > 0 {
            return Err(SyncError::UnresolvedEntries { kind, count });
        }

        store.reset_table(kind)?;
        tracing::info!(kind = %kind, "mirror table reset");
        Ok(())
    }

    /// Run one drain + pull cycle now.
    ///
    /// Returns `Ok(None)` when another run was in flight; that trigger is
    /// coalesced into one re-run after the current run finishes.
    pub async fn sync_now(&self) -> SyncResult<Option<CycleReport>> {
        self.run_single_flight(true).await
    }

    /// Drain the queue without pulling server state.
    ///
    /// Same single-flight guard as [`AutoSyncController::sync_now`].
    pub async fn process_queue(&self) -> SyncResult<Option<CycleReport>> {
        self.run_single_flight(false).await
    }

    /// One-time full sync after login, awaited by the caller so the UI can
    /// show deterministic progress.
    ///
    /// Every remote call is timeout-guarded; a stuck pull degrades to
    /// local-only data instead of hanging startup. Only an expired session
    /// aborts the run.
    pub async fn perform_initial_full_sync(&self) -> SyncResult<CycleReport> {
        if !self.state.try_begin() {
            return Err(SyncError::SyncInFlight);
        }

        let result = self.initial_full_sync_inner().await;
        if result.is_err() {
            self.state.set_phase(PHASE_FAILED);
        }
        self.state.finish();
        result
    }

    async fn initial_full_sync_inner(&self) -> SyncResult<CycleReport> {
        let mut tracker = ProgressTracker::new(
            &[
                ("preparing local data", 10),
                ("sending pending changes", 30),
                ("downloading server data", 50),
                ("finishing up", 10),
            ],
            Arc::clone(&self.sink),
        )?;
        let mut report = CycleReport::default();

        tracker.start();
        {
            // Confirm the mirror is readable before anything else; open()
            // already ran the migrations.
            let store = self.lock_store();
            for kind in EntityKind::ALL {
                let count = store.count(kind)?;
                tracing::debug!(kind = %kind, count, "local mirror ready");
            }
        }

        tracker.next_step();
        self.state.set_phase(PHASE_DRAINING);
        self.drain_queue(&mut report).await?;

        tracker.next_step();
        self.state.set_phase(PHASE_PULLING);
        for (i, kind) in EntityKind::ALL.iter().enumerate() {
            match self.pull_kind(*kind).await {
                Ok(written) => report.pulled += written,
                Err(SyncError::AuthExpired) => return Err(SyncError::AuthExpired),
                Err(e) => {
                    // Degraded startup: keep local data, let the app open.
                    tracing::warn!(kind = %kind, error = %e, "pull failed, continuing with local data");
                    report.failures.push(format!("{kind}: {e}"));
                }
            }
            tracker.step_fraction((i + 1) as f64 / EntityKind::ALL.len() as f64);
        }

        tracker.next_step();
        self.state.set_phase(PHASE_SETTLING);
        if let Some(summary) = report.summary() {
            self.sink.on_message(&summary);
        }

        tracker.complete();
        Ok(report)
    }

    /// Spawn the background auto-sync task.
    ///
    /// The task re-syncs when connectivity comes back (after the settle
    /// window) and on a periodic interval while online. Returns a handle
    /// whose `stop()` cancels the task.
    pub fn start_auto_sync(&self) -> AutoSyncHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let controller = self.clone();

        let task = tokio::spawn(async move {
            let mut online_rx = controller.connectivity.subscribe();
            let mut ticker = tokio::time::interval(controller.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = online_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if !*online_rx.borrow_and_update() {
                            continue;
                        }
                        // Debounce flapping: only drain once the state has
                        // stayed online for the settle window.
                        tokio::time::sleep(controller.config.settle_window).await;
                        if controller.connectivity.is_online() {
                            controller.background_sync().await;
                        }
                    }
                    _ = ticker.tick() => {
                        if controller.connectivity.is_online() {
                            controller.background_sync().await;
                        }
                    }
                }
            }
        });

        AutoSyncHandle { cancel, task }
    }

    async fn background_sync(&self) {
        match self.sync_now().await {
            Ok(Some(report)) => {
                if report.delivered > 0 || report.pulled > 0 {
                    tracing::info!(
                        delivered = report.delivered,
                        pulled = report.pulled,
                        "auto-sync cycle complete"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "auto-sync cycle failed"),
        }
    }

    fn lock_store(&self) -> MutexGuard<'_, LocalStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_single_flight(&self, pull: bool) -> SyncResult<Option<CycleReport>> {
        if !self.state.try_begin() {
            self.state.request_rerun();
            return Ok(None);
        }

        let mut result = self.run_cycle(pull).await;
        // A trigger that arrived mid-run is owed exactly one re-run; its
        // counts fold into the same report.
        while result.is_ok() && self.state.take_rerun() {
            match self.run_cycle(pull).await {
                Ok(extra) => {
                    if let Ok(report) = result.as_mut() {
                        report.absorb(extra);
                    }
                }
                Err(e) => result = Err(e),
            }
        }

        if result.is_err() {
            self.state.set_phase(PHASE_FAILED);
        }
        self.state.finish();
        result.map(Some)
    }

    async fn run_cycle(&self, pull: bool) -> SyncResult<CycleReport> {
        let mut report = CycleReport::default();

        self.state.set_phase(PHASE_DRAINING);
        self.drain_queue(&mut report).await?;

        if pull {
            self.state.set_phase(PHASE_PULLING);
            self.pull_remote(&mut report).await?;
        }

        self.state.set_phase(PHASE_SETTLING);
        if let Some(summary) = report.summary() {
            self.sink.on_message(&summary);
        }
        self.state.set_phase(PHASE_IDLE);

        Ok(report)
    }

    /// Deliver queued entries in FIFO order.
    ///
    /// The ordering key is the referenced local entity: once an entry for
    /// an entity fails transiently, later entries for the same entity are
    /// skipped this cycle so replay order is preserved. Unrelated entities
    /// keep draining.
    async fn drain_queue(&self, report: &mut CycleReport) -> SyncResult<()> {
        let entries = self.lock_store().pending_entries()?;
        if entries.is_empty() {
            return Ok(());
        }
        tracing::info!(count = entries.len(), "draining sync queue");

        let mut blocked: HashSet<String> = HashSet::new();

        for entry in entries {
            if blocked.contains(&entry.entity_id) {
                report.kept += 1;
                continue;
            }

            match self.deliver(&entry).await {
                Delivery::Acked { remote_id } => {
                    self.settle_ack(&entry, remote_id)?;
                    report.delivered += 1;
                }
                Delivery::Transient(reason) => {
                    tracing::debug!(id = %entry.id, %reason, "transient failure, entry stays queued");
                    let store = self.lock_store();
                    if let Err(e) = store.record_attempt(&entry.id) {
                        if !matches!(e, beat_core::Error::EntryNotFound(_)) {
                            return Err(e.into());
                        }
                    }
                    blocked.insert(entry.entity_id.clone());
                    report.kept += 1;
                }
                Delivery::Rejected(reason) => {
                    tracing::warn!(id = %entry.id, %reason, "entry permanently rejected, dropping");
                    self.lock_store().remove_entry(&entry.id)?;
                    report.dropped += 1;
                    if report.failures.len() < self.config.summary_limit {
                        report.failures.push(reason);
                    }
                }
                Delivery::AuthExpired => {
                    tracing::warn!("session expired mid-drain, aborting run with queue intact");
                    return Err(SyncError::AuthExpired);
                }
            }
        }

        Ok(())
    }

    /// Apply a successful delivery to the local mirror and the queue.
    fn settle_ack(&self, entry: &QueueEntry, remote_id: Option<i64>) -> SyncResult<()> {
        let store = self.lock_store();

        if let Some(kind) = mirrored_kind(entry.kind) {
            let outcome = if is_creation(entry.kind) {
                match remote_id {
                    Some(rid) => store
                        .mark_synced(kind, &entry.entity_id, rid)
                        .map(|()| true),
                    None => {
                        tracing::warn!(id = %entry.id, "ack carried no server id, record stays pending");
                        Ok(false)
                    }
                }
            } else {
                store.mark_update_synced(kind, &entry.entity_id)
            };

            match outcome {
                Ok(_) => {}
                Err(beat_core::Error::RecordNotFound(id)) => {
                    // The record may have been purged by a reset; the ack
                    // itself still stands.
                    tracing::warn!(%id, "acked entry references a missing record, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        store.remove_entry(&entry.id)?;
        Ok(())
    }

    /// Send one entry, classifying the outcome.
    async fn deliver(&self, entry: &QueueEntry) -> Delivery {
        let request = ApiRequest {
            method: entry.method,
            path: entry.endpoint.clone(),
            body: Some(entry.data.clone()),
            idempotency_key: Some(entry.id.to_string()),
        };

        let outcome = tokio::time::timeout(self.config.request_timeout, self.api.request(request)).await;

        match outcome {
            Err(_) => Delivery::Transient("request timed out".to_string()),
            Ok(Err(e)) => Delivery::Transient(e.to_string()),
            Ok(Ok(response)) if response.is_auth_expired() => Delivery::AuthExpired,
            Ok(Ok(response)) if response.is_success() => Delivery::Acked {
                remote_id: response.body.get("id").and_then(serde_json::Value::as_i64),
            },
            Ok(Ok(response)) if response.is_server_error() => {
                Delivery::Transient(format!("server error {}", response.status))
            }
            Ok(Ok(response)) => {
                let detail = response
                    .body
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("rejected");
                Delivery::Rejected(format!(
                    "{} {}: {} (status {})",
                    entry.kind, entry.entity_id, detail, response.status
                ))
            }
        }
    }

    /// Pull authoritative snapshots for every mirrored kind.
    ///
    /// A transient pull failure keeps whatever local data exists; it never
    /// discards mutations the drain already delivered.
    async fn pull_remote(&self, report: &mut CycleReport) -> SyncResult<()> {
        for kind in EntityKind::ALL {
            match self.pull_kind(kind).await {
                Ok(written) => report.pulled += written,
                Err(SyncError::AuthExpired) => return Err(SyncError::AuthExpired),
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "pull failed, keeping local data");
                }
            }
        }
        Ok(())
    }

    /// Pull one kind's snapshot and upsert it into the mirror.
    ///
    /// Snapshot items look like `{"id": 7, "local_id": "vp-...", "data":
    /// {...}}`; `local_id` is present for records this device created.
    async fn pull_kind(&self, kind: EntityKind) -> SyncResult<usize> {
        let request = ApiRequest::get(pull_endpoint(kind));
        let response = tokio::time::timeout(self.config.request_timeout, self.api.request(request))
            .await
            .map_err(|_| SyncError::TransientNetwork("snapshot request timed out".to_string()))?
            .map_err(|e| SyncError::TransientNetwork(e.to_string()))?;

        if response.is_auth_expired() {
            return Err(SyncError::AuthExpired);
        }
        if !response.is_success() {
            return Err(SyncError::TransientNetwork(format!(
                "snapshot request failed with status {}",
                response.status
            )));
        }

        let Some(items) = response.body.as_array() else {
            return Ok(0);
        };

        let store = self.lock_store();
        let mut written = 0;
        for item in items {
            let Some(remote_id) = item.get("id").and_then(serde_json::Value::as_i64) else {
                continue;
            };
            let local_id = item
                .get("local_id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-r{}", local_id_prefix(kind), remote_id));
            let payload = item
                .get("data")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            if payload.is_null() {
                continue;
            }

            if store.apply_remote(kind, remote_id, &local_id, &payload)? {
                written += 1;
            }
        }

        tracing::debug!(kind = %kind, written, "snapshot applied");
        Ok(written)
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
