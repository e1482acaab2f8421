// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! beatsync: offline-first sync engine for the beat field-sales app.
//!
//! Mirrors server-owned entities into a local SQLite store, records user
//! actions performed while disconnected in a durable queue, and reconciles
//! both with the server whenever connectivity returns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Controller  │────►│  RemoteApi  │────►│   Server    │
//! │ (AutoSync)   │◄────│   (trait)   │◄────│             │
//! └──────┬───────┘     └─────────────┘     └─────────────┘
//!        │                    ▲
//!        ▼                    │
//! ┌──────────────┐     ┌──────┴──────┐
//! │  LocalStore  │     │ Attendance  │  (geofenced check-in/out)
//! │  + SyncQueue │◄────│   Service   │
//! └──────────────┘     └─────────────┘
//! ```
//!
//! # Guarantees
//!
//! - No acknowledged local write is lost across app restarts
//! - At-least-once delivery with server-side idempotency-token dedup
//! - Per-entity FIFO replay order
//! - Single-flight sync runs; overlapping triggers coalesce

pub mod attendance;
pub mod connectivity;
pub mod controller;
pub mod error;
pub mod location;
pub mod progress;
pub mod remote;
pub mod uploader;

pub use attendance::{AttendanceConfig, AttendanceService};
pub use connectivity::ConnectivityMonitor;
pub use controller::{
    AutoSyncController, AutoSyncHandle, CycleReport, EngineConfig, SharedSyncState,
};
pub use error::{SyncError, SyncResult};
pub use location::{AccuracyHint, LocationError, LocationProvider, Position};
pub use progress::{NoopSink, ProgressSink, ProgressTracker, SyncStep};
pub use remote::{ApiError, ApiRequest, ApiResponse, HttpApi, RemoteApi};
pub use uploader::{Photo, PhotoUploader, UploadError};

#[cfg(test)]
mod test_helpers;
