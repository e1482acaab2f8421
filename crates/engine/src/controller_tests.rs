// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the auto-sync controller.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use beat_core::{EntityKind, MirroredRecord, OpKind, SyncStatus};

use super::*;
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncError;
use crate::test_helpers::{
    insert_customer, make_entry, mem_store, MockApi, RecordingSink, Scripted,
};

fn controller(
    store: Arc<std::sync::Mutex<beat_core::LocalStore>>,
    api: Arc<MockApi>,
) -> Arc<AutoSyncController<MockApi>> {
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    Arc::new(AutoSyncController::new(
        store,
        api,
        monitor,
        EngineConfig {
            request_timeout: Duration::from_millis(500),
            settle_window: Duration::from_millis(10),
            poll_interval: Duration::from_secs(3600),
            summary_limit: 3,
        },
    ))
}

#[tokio::test]
async fn test_drain_acks_mark_synced_and_clear_queue() {
    let store = mem_store();
    {
        let s = store.lock().unwrap();
        s.insert(
            EntityKind::Customer,
            &MirroredRecord::new("c-1", serde_json::json!({ "name": "a" })),
        )
        .unwrap();
        s.enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
            .unwrap();
    }

    let api = Arc::new(MockApi::new());
    let ctl = controller(Arc::clone(&store), Arc::clone(&api));

    let report = ctl.sync_now().await.unwrap().unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.dropped, 0);

    let s = store.lock().unwrap();
    assert!(s.queue_is_empty().unwrap());
    let record = s.get(EntityKind::Customer, "c-1").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert!(record.remote_id.is_some());
}

#[tokio::test]
async fn test_transient_failure_keeps_entry_and_blocks_same_entity() {
    let store = mem_store();
    {
        let s = store.lock().unwrap();
        s.enqueue(&make_entry(1000, OpKind::CheckIn, "vp-1", "/api/attendance/check-in"))
            .unwrap();
        s.enqueue(&make_entry(2000, OpKind::CheckOut, "vp-1", "/api/attendance/check-out"))
            .unwrap();
        s.enqueue(&make_entry(3000, OpKind::CreateStockAdjustment, "sa-1", "/api/stock"))
            .unwrap();
    }

    let api = Arc::new(MockApi::new());
    api.push("/api/attendance/check-in", Scripted::unreachable());
    let ctl = controller(Arc::clone(&store), Arc::clone(&api));

    let report = ctl.sync_now().await.unwrap().unwrap();

    // vp-1's check-in failed transiently; its check-out must wait too.
    // The unrelated stock adjustment drains.
    assert_eq!(report.delivered, 1);
    assert_eq!(report.kept, 2);

    let s = store.lock().unwrap();
    let left = s.pending_entries().unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].kind, OpKind::CheckIn);
    assert_eq!(left[0].attempts, 1);
    // The blocked entry was skipped without an attempt.
    assert_eq!(left[1].kind, OpKind::CheckOut);
    assert_eq!(left[1].attempts, 0);
    assert!(api.requests_for("/api/attendance/check-out").is_empty());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let store = mem_store();
    store
        .lock()
        .unwrap()
        .enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
        .unwrap();

    let api = Arc::new(MockApi::new());
    api.push(
        "/api/customers",
        Scripted::status(503, serde_json::json!({ "message": "maintenance" })),
    );
    let ctl = controller(Arc::clone(&store), api);

    let report = ctl.sync_now().await.unwrap().unwrap();

    assert_eq!(report.kept, 1);
    assert_eq!(store.lock().unwrap().queue_len().unwrap(), 1);
}

#[tokio::test]
async fn test_validation_failure_drops_entry_and_continues() {
    let store = mem_store();
    {
        let s = store.lock().unwrap();
        s.enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-bad", "/api/customers"))
            .unwrap();
        s.enqueue(&make_entry(2000, OpKind::CreateStockAdjustment, "sa-1", "/api/stock"))
            .unwrap();
    }

    let api = Arc::new(MockApi::new());
    api.push(
        "/api/customers",
        Scripted::status(422, serde_json::json!({ "message": "name required" })),
    );
    let sink = Arc::new(RecordingSink::new());
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let ctl = AutoSyncController::with_sink(
        Arc::clone(&store),
        api,
        monitor,
        EngineConfig::default(),
        Arc::clone(&sink) as Arc<dyn crate::progress::ProgressSink>,
    );

    let report = ctl.sync_now().await.unwrap().unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("name required"));
    assert!(store.lock().unwrap().queue_is_empty().unwrap());

    // One summary message for the whole run, not one alert per entry.
    let messages = sink.message_list();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("could not be synced"));
}

#[tokio::test]
async fn test_auth_expiry_aborts_run_preserving_queue() {
    let store = mem_store();
    {
        let s = store.lock().unwrap();
        s.enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
            .unwrap();
        s.enqueue(&make_entry(2000, OpKind::CreateCustomer, "c-2", "/api/customers"))
            .unwrap();
    }

    let api = Arc::new(MockApi::new());
    api.push("/api/customers", Scripted::status(401, serde_json::Value::Null));
    let ctl = controller(Arc::clone(&store), api);

    let err = ctl.sync_now().await.unwrap_err();
    assert!(matches!(err, SyncError::AuthExpired));

    // Nothing was dropped; both entries wait for re-authentication.
    assert_eq!(store.lock().unwrap().queue_len().unwrap(), 2);
    // The controller is idle again and usable.
    assert!(!ctl.state().is_in_flight());
}

#[tokio::test]
async fn test_offline_edits_drain_to_last_write() {
    let store = mem_store();
    {
        let s = store.lock().unwrap();
        s.insert(
            EntityKind::Customer,
            &MirroredRecord::new("c-1", serde_json::json!({ "name": "v1" })),
        )
        .unwrap();
        s.enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
            .unwrap();

        // Two more offline edits, each queued in order.
        s.update(EntityKind::Customer, "c-1", &serde_json::json!({ "name": "v2" }))
            .unwrap();
        s.enqueue(&make_entry(2000, OpKind::CreateCustomer, "c-1", "/api/customers"))
            .unwrap();
        s.update(EntityKind::Customer, "c-1", &serde_json::json!({ "name": "v3" }))
            .unwrap();
        s.enqueue(&make_entry(3000, OpKind::CreateCustomer, "c-1", "/api/customers"))
            .unwrap();
    }

    let api = Arc::new(MockApi::new());
    let ctl = controller(Arc::clone(&store), Arc::clone(&api));

    let report = ctl.sync_now().await.unwrap().unwrap();
    assert_eq!(report.delivered, 3);

    // Exactly one record, synced, carrying the last edit's payload.
    let s = store.lock().unwrap();
    assert_eq!(s.count(EntityKind::Customer).unwrap(), 1);
    let record = s.get(EntityKind::Customer, "c-1").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.payload["name"], "v3");
    assert!(s.queue_is_empty().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_triggers_deliver_each_entry_once() {
    let store = mem_store();
    store
        .lock()
        .unwrap()
        .enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
        .unwrap();

    let api = Arc::new(MockApi::new());
    // Slow ack so the second trigger lands while the first run is in flight.
    api.push(
        "/api/customers",
        Scripted::slow_ok(serde_json::json!({ "id": 7 }), 150),
    );
    let ctl = controller(Arc::clone(&store), Arc::clone(&api));

    let first = {
        let ctl = Arc::clone(&ctl);
        tokio::spawn(async move { ctl.sync_now().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = ctl.sync_now().await.unwrap();

    // The overlapping trigger was coalesced, not run concurrently.
    assert!(second.is_none());
    let report = first.await.unwrap().unwrap().unwrap();
    assert_eq!(report.delivered, 1);

    // The entry's effect reached the server exactly once.
    assert_eq!(api.requests_for("/api/customers").len(), 1);
}

#[tokio::test]
async fn test_pull_applies_snapshot_without_clobbering_pending() {
    let store = mem_store();
    {
        let s = store.lock().unwrap();
        // A local record with unsynced edits, plus its queue entry.
        s.insert(
            EntityKind::Customer,
            &MirroredRecord::new("c-1", serde_json::json!({ "name": "local edit" })),
        )
        .unwrap();
        s.mark_synced(EntityKind::Customer, "c-1", 7).unwrap();
        s.update(EntityKind::Customer, "c-1", &serde_json::json!({ "name": "newer local" }))
            .unwrap();
    }

    let api = Arc::new(MockApi::new());
    api.push(
        "/api/customers",
        Scripted::ok(serde_json::json!([
            { "id": 7, "local_id": "c-1", "data": { "name": "stale server" } },
            { "id": 8, "data": { "name": "new from server" } },
        ])),
    );
    let ctl = controller(Arc::clone(&store), api);

    let report = ctl.sync_now().await.unwrap().unwrap();
    assert_eq!(report.pulled, 1);

    let s = store.lock().unwrap();
    // The pending local edit survived the pull.
    let local = s.get(EntityKind::Customer, "c-1").unwrap().unwrap();
    assert_eq!(local.payload["name"], "newer local");
    assert_eq!(local.sync_status, SyncStatus::Pending);
    // The unseen server record was mirrored as synced.
    let pulled = s.get_by_remote_id(EntityKind::Customer, 8).unwrap().unwrap();
    assert_eq!(pulled.sync_status, SyncStatus::Synced);
    assert_eq!(pulled.local_id, "cus-r8");
}

#[tokio::test]
async fn test_pull_failure_keeps_drained_mutations() {
    let store = mem_store();
    {
        let s = store.lock().unwrap();
        s.insert(
            EntityKind::VisitPlan,
            &MirroredRecord::new("vp-1", serde_json::json!({ "status": "planned" })),
        )
        .unwrap();
        s.enqueue(&make_entry(1000, OpKind::CreateVisitPlan, "vp-1", "/api/visits"))
            .unwrap();
    }

    let api = Arc::new(MockApi::new());
    // The drain ack lands, then every snapshot endpoint is down.
    api.push("/api/visit-plans", Scripted::unreachable());
    api.push("/api/customers", Scripted::unreachable());
    api.push("/api/geo-mappings", Scripted::unreachable());
    let ctl = controller(Arc::clone(&store), api);

    let report = ctl.sync_now().await.unwrap().unwrap();

    // The failed pull did not roll back or discard the drained mutation.
    assert_eq!(report.delivered, 1);
    assert_eq!(report.pulled, 0);
    let s = store.lock().unwrap();
    assert!(s.queue_is_empty().unwrap());
    let record = s.get(EntityKind::VisitPlan, "vp-1").unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_initial_full_sync_reports_progress_and_degrades_on_timeout() {
    let store = mem_store();
    let api = Arc::new(MockApi::new());
    // One snapshot stalls past the request timeout; startup must not hang.
    api.push(
        "/api/visit-plans",
        Scripted::slow_ok(serde_json::json!([]), 2_000),
    );
    api.push("/api/customers", Scripted::ok(serde_json::json!([
        { "id": 7, "data": { "name": "from server" } },
    ])));
    api.push("/api/geo-mappings", Scripted::ok(serde_json::json!([])));

    let sink = Arc::new(RecordingSink::new());
    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let ctl = AutoSyncController::with_sink(
        Arc::clone(&store),
        api,
        monitor,
        EngineConfig {
            request_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        },
        Arc::clone(&sink) as Arc<dyn crate::progress::ProgressSink>,
    );

    let report = ctl.perform_initial_full_sync().await.unwrap();

    // Degraded: the stalled kind is reported, the others landed.
    assert_eq!(report.pulled, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("visit-plan"));

    let percents = sink.percents();
    assert_eq!(*percents.first().unwrap(), 0);
    assert_eq!(*percents.last().unwrap(), 100);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
}

#[tokio::test]
async fn test_initial_full_sync_is_exclusive() {
    let store = mem_store();
    let api = Arc::new(MockApi::new());
    api.push(
        "/api/visit-plans",
        Scripted::slow_ok(serde_json::json!([]), 150),
    );
    let ctl = controller(Arc::clone(&store), api);

    let first = {
        let ctl = Arc::clone(&ctl);
        tokio::spawn(async move { ctl.perform_initial_full_sync().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let err = ctl.perform_initial_full_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::SyncInFlight));

    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_invalidate_refused_with_unresolved_entries() {
    let store = mem_store();
    insert_customer(&store, "c-1", 0.0, 0.0, None);
    store
        .lock()
        .unwrap()
        .enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
        .unwrap();

    let api = Arc::new(MockApi::new());
    let ctl = controller(Arc::clone(&store), api);

    let err = ctl.invalidate(EntityKind::Customer).unwrap_err();
    assert!(matches!(
        err,
        SyncError::UnresolvedEntries {
            kind: EntityKind::Customer,
            count: 1
        }
    ));

    // An unrelated kind can still be reset.
    ctl.invalidate(EntityKind::GeoMapping).unwrap();
    assert_eq!(store.lock().unwrap().count(EntityKind::Customer).unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_auto_sync_triggers_once_per_online_transition() {
    let store = mem_store();
    store
        .lock()
        .unwrap()
        .enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
        .unwrap();

    let api = Arc::new(MockApi::new());
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let ctl = Arc::new(AutoSyncController::new(
        Arc::clone(&store),
        Arc::clone(&api),
        Arc::clone(&monitor),
        EngineConfig {
            request_timeout: Duration::from_millis(500),
            settle_window: Duration::from_millis(20),
            poll_interval: Duration::from_secs(3600),
            summary_limit: 3,
        },
    ));

    let handle = ctl.start_auto_sync();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Two near-simultaneous "online" reports: the second is not a
    // transition and the settle window coalesces the first.
    monitor.set_online(true);
    monitor.set_online(true);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(api.requests_for("/api/customers").len(), 1);
    assert!(store.lock().unwrap().queue_is_empty().unwrap());

    handle.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flapping_within_settle_window_drains_nothing() {
    let store = mem_store();
    store
        .lock()
        .unwrap()
        .enqueue(&make_entry(1000, OpKind::CreateCustomer, "c-1", "/api/customers"))
        .unwrap();

    let api = Arc::new(MockApi::new());
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let ctl = Arc::new(AutoSyncController::new(
        Arc::clone(&store),
        Arc::clone(&api),
        Arc::clone(&monitor),
        EngineConfig {
            request_timeout: Duration::from_millis(500),
            settle_window: Duration::from_millis(100),
            poll_interval: Duration::from_secs(3600),
            summary_limit: 3,
        },
    ));

    let handle = ctl.start_auto_sync();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Online flap that dies before the settle window elapses.
    monitor.set_online(true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    monitor.set_online(false);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(api.requests_for("/api/customers").is_empty());
    assert_eq!(store.lock().unwrap().queue_len().unwrap(), 1);

    handle.stop();
}

#[tokio::test]
async fn test_process_queue_drains_without_pulling() {
    let store = mem_store();
    store
        .lock()
        .unwrap()
        .enqueue(&make_entry(1000, OpKind::CreateStockAdjustment, "sa-1", "/api/stock"))
        .unwrap();

    let api = Arc::new(MockApi::new());
    let ctl = controller(Arc::clone(&store), Arc::clone(&api));

    let report = ctl.process_queue().await.unwrap().unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.pulled, 0);
    assert!(api.requests_for("/api/customers").is_empty());
    assert!(api.requests_for("/api/visit-plans").is_empty());
}

#[tokio::test]
async fn test_phase_returns_to_idle() {
    let store = mem_store();
    let api = Arc::new(MockApi::new());
    let ctl = controller(Arc::clone(&store), api);

    assert_eq!(ctl.state().phase_string(), "idle");
    ctl.sync_now().await.unwrap();
    assert_eq!(ctl.state().phase_string(), "idle");
    assert!(!ctl.state().is_in_flight());
}
