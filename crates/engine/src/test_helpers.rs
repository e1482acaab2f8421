// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures and mock collaborators for engine tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beat_core::{
    Customer, EntityKind, LocalStore, Method, MirroredRecord, OpKind, OpToken, QueueEntry,
    VisitPlan, VisitStatus,
};

use crate::location::{AccuracyHint, LocationError, LocationProvider, Position};
use crate::progress::ProgressSink;
use crate::remote::{ApiError, ApiRequest, ApiResponse, ApiResult, RemoteApi};
use crate::uploader::{Photo, PhotoUploader, UploadError};

/// A scripted response for one request.
pub enum Scripted {
    /// Respond with this status and body, after an optional delay.
    Status {
        status: u16,
        body: serde_json::Value,
        delay_ms: u64,
    },
    /// Fail as unreachable.
    Network(String),
}

impl Scripted {
    pub fn ok(body: serde_json::Value) -> Self {
        Scripted::Status {
            status: 200,
            body,
            delay_ms: 0,
        }
    }

    pub fn status(status: u16, body: serde_json::Value) -> Self {
        Scripted::Status {
            status,
            body,
            delay_ms: 0,
        }
    }

    pub fn slow_ok(body: serde_json::Value, delay_ms: u64) -> Self {
        Scripted::Status {
            status: 200,
            body,
            delay_ms,
        }
    }

    pub fn unreachable() -> Self {
        Scripted::Network("connection refused".to_string())
    }
}

/// Mock remote API: records every request, answers from per-path scripts,
/// and defaults to `200 {"id": <n>}` with a fresh id per ack.
pub struct MockApi {
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
    next_id: AtomicI64,
}

impl MockApi {
    pub fn new() -> Self {
        MockApi {
            script: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
        }
    }

    /// Queue a scripted response for a path. Consumed FIFO per path; once
    /// a path's script runs dry the default ack applies again.
    pub fn push(&self, path: &str, scripted: Scripted) {
        self.script
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(scripted);
    }

    /// All requests seen, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests against one path.
    pub fn requests_for(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Idempotency keys seen on one path, in order.
    pub fn idempotency_keys_for(&self, path: &str) -> Vec<String> {
        self.requests_for(path)
            .into_iter()
            .filter_map(|r| r.idempotency_key)
            .collect()
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteApi for MockApi {
    fn request(
        &self,
        req: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = ApiResult<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(req.clone());

            let scripted = self
                .script
                .lock()
                .unwrap()
                .get_mut(&req.path)
                .and_then(VecDeque::pop_front);

            match scripted {
                Some(Scripted::Status {
                    status,
                    body,
                    delay_ms,
                }) => {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    Ok(ApiResponse { status, body })
                }
                Some(Scripted::Network(message)) => Err(ApiError::Unreachable(message)),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    Ok(ApiResponse {
                        status: 200,
                        body: serde_json::json!({ "id": id }),
                    })
                }
            }
        })
    }
}

/// What the mock location provider should report.
pub enum FixScript {
    At(Position),
    Denied,
    TimedOut,
}

/// Mock location provider returning a scripted fix.
pub struct MockLocations {
    script: Mutex<FixScript>,
}

impl MockLocations {
    pub fn at(lat: f64, lon: f64, accuracy_m: f64) -> Self {
        MockLocations {
            script: Mutex::new(FixScript::At(Position {
                lat,
                lon,
                accuracy_m,
            })),
        }
    }

    pub fn denied() -> Self {
        MockLocations {
            script: Mutex::new(FixScript::Denied),
        }
    }

    pub fn set(&self, script: FixScript) {
        *self.script.lock().unwrap() = script;
    }
}

impl LocationProvider for MockLocations {
    fn current_position(
        &self,
        _hint: AccuracyHint,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Position, LocationError>> + Send + '_>>
    {
        Box::pin(async move {
            match &*self.script.lock().unwrap() {
                FixScript::At(position) => Ok(*position),
                FixScript::Denied => Err(LocationError::PermissionDenied),
                FixScript::TimedOut => Err(LocationError::Timeout),
            }
        })
    }
}

/// Mock uploader recording every call.
pub struct MockUploader {
    pub calls: Mutex<Vec<(EntityKind, String, usize)>>,
}

impl MockUploader {
    pub fn new() -> Self {
        MockUploader {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotoUploader for MockUploader {
    fn upload(
        &self,
        kind: EntityKind,
        entity_id: &str,
        photos: &[Photo],
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, UploadError>> + Send + '_>> {
        let entity_id = entity_id.to_string();
        let count = photos.len();
        Box::pin(async move {
            self.calls.lock().unwrap().push((kind, entity_id.clone(), count));
            Ok(format!("https://cdn.example/{entity_id}/evidence.zip"))
        })
    }
}

/// Progress sink recording everything it is told.
#[derive(Default)]
pub struct RecordingSink {
    pub progress: Mutex<Vec<u8>>,
    pub messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.progress.lock().unwrap().clone()
    }

    pub fn message_list(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, percent: u8) {
        self.progress.lock().unwrap().push(percent);
    }

    fn on_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Fresh in-memory store behind the engine's mutex.
pub fn mem_store() -> Arc<Mutex<LocalStore>> {
    Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()))
}

/// Insert a customer record at the given coordinates.
pub fn insert_customer(
    store: &Arc<Mutex<LocalStore>>,
    local_id: &str,
    lat: f64,
    lon: f64,
    geofence_radius_m: Option<f64>,
) {
    let customer = Customer {
        name: format!("Customer {local_id}"),
        address: "Jl. Contoh 1".to_string(),
        lat,
        lon,
        geofence_radius_m,
        phone: None,
    };
    let record = MirroredRecord::new(local_id, customer.to_payload().unwrap());
    store
        .lock()
        .unwrap()
        .insert(EntityKind::Customer, &record)
        .unwrap();
}

/// Insert a visit plan in the given attendance state.
pub fn insert_plan(
    store: &Arc<Mutex<LocalStore>>,
    local_id: &str,
    customer_local_id: &str,
    status: VisitStatus,
) {
    let plan = VisitPlan {
        customer_local_id: customer_local_id.to_string(),
        visit_date: "2026-08-07".to_string(),
        status,
        check_in_at: None,
        check_out_at: None,
        note: None,
    };
    let record = MirroredRecord::new(local_id, plan.to_payload().unwrap());
    store
        .lock()
        .unwrap()
        .insert(EntityKind::VisitPlan, &record)
        .unwrap();
}

/// A queue entry with a deterministic token.
pub fn make_entry(wall_ms: u64, kind: OpKind, entity_id: &str, endpoint: &str) -> QueueEntry {
    QueueEntry::new(
        OpToken::new(wall_ms, 0, 1),
        kind,
        entity_id,
        endpoint,
        Method::Post,
        serde_json::json!({ "entity": entity_id }),
    )
}

/// A single captured photo.
pub fn make_photo() -> Photo {
    Photo {
        file_name: "evidence-001.jpg".to_string(),
        bytes: vec![0xFF, 0xD8, 0xFF],
    }
}
