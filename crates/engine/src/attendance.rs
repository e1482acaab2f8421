// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Geofenced attendance: check-in and check-out validation.
//!
//! A visit plan walks `planned -> checked_in -> checked_out`. Check-in is
//! gated on a sufficiently accurate location fix, captured photo evidence,
//! and the device sitting inside the customer's geofence. Check-out is
//! gated on the plan actually being checked in, verified against the
//! server when the device is online so a replay-ordering bug can never
//! produce a checkout with no matching check-in.
//!
//! Accepted transitions update the local mirror and enqueue the matching
//! operation; the auto-sync controller delivers it like any other entry.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;

use beat_core::{
    haversine_m, Customer, EntityKind, LatLon, LocalStore, Method, OpKind, OpToken, QueueEntry,
    TokenClock, VisitPlan, VisitStatus,
};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::location::{AccuracyHint, LocationError, LocationProvider};
use crate::remote::{ApiRequest, RemoteApi};
use crate::uploader::{Photo, PhotoUploader};

const CHECK_IN_ENDPOINT: &str = "/api/attendance/check-in";
const CHECK_OUT_ENDPOINT: &str = "/api/attendance/check-out";

/// Configuration for attendance validation.
#[derive(Debug, Clone)]
pub struct AttendanceConfig {
    /// Maximum reported fix accuracy accepted for a geofence decision, in
    /// meters. A coarser fix is rejected before distance is evaluated.
    pub accuracy_limit_m: f64,
    /// Timeout for the server-side status lookup on check-out.
    pub lookup_timeout: Duration,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        AttendanceConfig {
            accuracy_limit_m: 50.0,
            lookup_timeout: Duration::from_secs(10),
        }
    }
}

/// Validates attendance transitions and emits queue entries for them.
pub struct AttendanceService<A: RemoteApi, L: LocationProvider, U: PhotoUploader> {
    store: Arc<Mutex<LocalStore>>,
    api: Arc<A>,
    location: L,
    uploader: U,
    connectivity: Arc<ConnectivityMonitor>,
    tokens: TokenClock,
    config: AttendanceConfig,
}

impl<A: RemoteApi, L: LocationProvider, U: PhotoUploader> AttendanceService<A, L, U> {
    pub fn new(
        store: Arc<Mutex<LocalStore>>,
        api: Arc<A>,
        location: L,
        uploader: U,
        connectivity: Arc<ConnectivityMonitor>,
        tokens: TokenClock,
        config: AttendanceConfig,
    ) -> Self {
        AttendanceService {
            store,
            api,
            location,
            uploader,
            connectivity,
            tokens,
            config,
        }
    }

    fn lock_store(&self) -> MutexGuard<'_, LocalStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load_plan(&self, plan_local_id: &str) -> SyncResult<(Option<i64>, VisitPlan)> {
        let store = self.lock_store();
        let record = store
            .get(EntityKind::VisitPlan, plan_local_id)?
            .ok_or_else(|| SyncError::RecordNotFound(format!("visit plan {plan_local_id}")))?;
        let plan: VisitPlan = record.payload_as()?;
        Ok((record.remote_id, plan))
    }

    /// Attempt the `planned -> checked_in` transition.
    ///
    /// Guards, in order: the transition itself, captured evidence, fix
    /// accuracy (rejected before distance is even evaluated), geofence
    /// distance. On success the local plan flips to checked-in and a
    /// check-in entry is queued; the minted token is returned.
    pub async fn check_in(&self, plan_local_id: &str, photos: &[Photo]) -> SyncResult<OpToken> {
        let (_, plan) = self.load_plan(plan_local_id)?;

        if !plan.status.can_transition_to(VisitStatus::CheckedIn) {
            return Err(SyncError::InvalidTransition {
                from: plan.status,
                to: VisitStatus::CheckedIn,
            });
        }

        if photos.is_empty() {
            return Err(SyncError::AttachmentMissing);
        }

        let customer: Customer = {
            let store = self.lock_store();
            let record = store
                .get(EntityKind::Customer, &plan.customer_local_id)?
                .ok_or_else(|| {
                    SyncError::RecordNotFound(format!("customer {}", plan.customer_local_id))
                })?;
            record.payload_as()?
        };

        let fix = self
            .location
            .current_position(AccuracyHint::High)
            .await
            .map_err(|e| match e {
                LocationError::PermissionDenied => {
                    SyncError::Permission("location access denied".to_string())
                }
                timeout => SyncError::Location(timeout),
            })?;

        if fix.accuracy_m > self.config.accuracy_limit_m {
            return Err(SyncError::LowAccuracy {
                accuracy_m: fix.accuracy_m,
                limit_m: self.config.accuracy_limit_m,
            });
        }

        let distance_m = haversine_m(
            LatLon::new(fix.lat, fix.lon),
            LatLon::new(customer.lat, customer.lon),
        );
        let radius_m = customer.effective_radius_m();
        if distance_m > radius_m {
            return Err(SyncError::OutsideGeofence {
                distance_m,
                radius_m,
            });
        }

        // Upload evidence right away while online; offline, the captures
        // stay on device and the entry notes that the archive is owed.
        let evidence_uri = if self.connectivity.is_online() {
            Some(
                self.uploader
                    .upload(EntityKind::VisitPlan, plan_local_id, photos)
                    .await?,
            )
        } else {
            None
        };

        let now = Utc::now();
        let token = self.tokens.mint();
        let evidence_deferred = evidence_uri.is_none();
        let data = serde_json::json!({
            "visit_plan": plan_local_id,
            "checked_in_at": now.to_rfc3339(),
            "lat": fix.lat,
            "lon": fix.lon,
            "accuracy_m": fix.accuracy_m,
            "distance_m": distance_m,
            "evidence_uri": evidence_uri,
            "evidence_deferred": evidence_deferred,
        });

        {
            let store = self.lock_store();
            store.update(
                EntityKind::VisitPlan,
                plan_local_id,
                &serde_json::json!({
                    "status": VisitStatus::CheckedIn,
                    "check_in_at": now.to_rfc3339(),
                }),
            )?;
            store.enqueue(&QueueEntry::new(
                token,
                OpKind::CheckIn,
                plan_local_id,
                CHECK_IN_ENDPOINT,
                Method::Post,
                data,
            ))?;
        }

        tracing::info!(plan = plan_local_id, distance_m, "checked in");
        Ok(token)
    }

    /// Attempt the `checked_in -> checked_out` transition.
    ///
    /// The plan must already be checked in. Online, that is confirmed
    /// against the server, not just locally; offline, the local state
    /// stands in, and FIFO per-entity draining guarantees the server sees
    /// the check-in first on replay.
    pub async fn check_out(&self, plan_local_id: &str) -> SyncResult<OpToken> {
        let (remote_id, plan) = self.load_plan(plan_local_id)?;

        if plan.status != VisitStatus::CheckedIn {
            return Err(SyncError::InvalidTransition {
                from: plan.status,
                to: VisitStatus::CheckedOut,
            });
        }

        if self.connectivity.is_online() {
            if let Some(server_status) = self.remote_visit_status(remote_id).await? {
                if server_status != VisitStatus::CheckedIn {
                    return Err(SyncError::InvalidTransition {
                        from: server_status,
                        to: VisitStatus::CheckedOut,
                    });
                }
            }
        } else {
            let queued_check_in = self
                .lock_store()
                .pending_entries_for(OpKind::CheckIn, plan_local_id)?;
            tracing::debug!(
                plan = plan_local_id,
                queued = queued_check_in.len(),
                "offline checkout, relying on local state and queue order"
            );
        }

        let now = Utc::now();
        let token = self.tokens.mint();
        let data = serde_json::json!({
            "visit_plan": plan_local_id,
            "checked_out_at": now.to_rfc3339(),
        });

        {
            let store = self.lock_store();
            store.update(
                EntityKind::VisitPlan,
                plan_local_id,
                &serde_json::json!({
                    "status": VisitStatus::CheckedOut,
                    "check_out_at": now.to_rfc3339(),
                }),
            )?;
            store.enqueue(&QueueEntry::new(
                token,
                OpKind::CheckOut,
                plan_local_id,
                CHECK_OUT_ENDPOINT,
                Method::Post,
                data,
            ))?;
        }

        tracing::info!(plan = plan_local_id, "checked out");
        Ok(token)
    }

    /// Look up the plan's attendance state on the server.
    ///
    /// Returns `None` when the server has no answer to offer: the plan has
    /// no remote id yet, the server does not know it, or the lookup failed
    /// transiently. The caller then falls back to the local guard. An
    /// expired session propagates.
    async fn remote_visit_status(&self, remote_id: Option<i64>) -> SyncResult<Option<VisitStatus>> {
        let Some(remote_id) = remote_id else {
            return Ok(None);
        };

        let request = ApiRequest::get(format!("/api/visit-plans/{remote_id}"));
        let outcome = tokio::time::timeout(self.config.lookup_timeout, self.api.request(request)).await;

        let response = match outcome {
            Err(_) => {
                tracing::warn!(remote_id, "status lookup timed out, using local state");
                return Ok(None);
            }
            Ok(Err(e)) => {
                tracing::warn!(remote_id, error = %e, "status lookup unreachable, using local state");
                return Ok(None);
            }
            Ok(Ok(response)) => response,
        };

        if response.is_auth_expired() {
            return Err(SyncError::AuthExpired);
        }
        if !response.is_success() {
            return Ok(None);
        }

        let status = response
            .body
            .get("status")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<VisitStatus>().ok());
        Ok(status)
    }
}

#[cfg(test)]
#[path = "attendance_tests.rs"]
mod tests;
