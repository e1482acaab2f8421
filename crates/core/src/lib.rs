// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! beat-core: shared library for the beat field-sales sync engine
//!
//! This crate provides the core data structures, local persistence, and
//! primitives used by the beatsync engine: mirrored entity records, the
//! durable sync queue, idempotency tokens, and geofence geometry.

pub mod entity;
pub mod error;
pub mod geo;
pub mod queue;
pub mod store;
pub mod token;

pub use entity::{
    Customer, EntityKind, GeoMapping, MirroredRecord, SyncStatus, VisitPlan, VisitStatus,
    DEFAULT_GEOFENCE_RADIUS_M, MIN_GEOFENCE_RADIUS_M,
};
pub use error::{Error, Result};
pub use geo::{haversine_m, LatLon};
pub use queue::{Method, OpKind, QueueEntry};
pub use store::LocalStore;
pub use token::{ClockSource, OpToken, SystemClock, TokenClock};
