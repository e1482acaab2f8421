// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the beatsync engine.
//!
//! The taxonomy drives queue behavior: transient failures leave an entry
//! queued for the next drain cycle, validation failures drop the entry and
//! surface in the end-of-run summary, and an expired session aborts the
//! whole run with the queue intact.

use thiserror::Error;

use beat_core::{EntityKind, VisitStatus};

use crate::location::LocationError;
use crate::remote::ApiError;
use crate::uploader::UploadError;

/// All possible errors that can occur in beatsync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server could not be reached; retry on the next cycle.
    #[error("network unreachable: {0}")]
    TransientNetwork(String),

    /// The server rejected the operation; retrying cannot help.
    #[error("request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    /// A local record referenced by an operation is missing.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// A device capability (location, camera) was denied.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The session expired; the caller must re-authenticate. The queue is
    /// preserved intact.
    #[error("authentication expired")]
    AuthExpired,

    /// A sync run is already in flight.
    #[error("a sync run is already in flight")]
    SyncInFlight,

    /// A destructive reset was refused because queued operations still
    /// reference records of this kind.
    #[error("cannot reset {kind}: {count} queued entries still reference its records")]
    UnresolvedEntries { kind: EntityKind, count: usize },

    #[error("invalid progress steps: {0}")]
    InvalidSteps(String),

    /// The location fix was too coarse to evaluate the geofence.
    #[error("location accuracy too low: {accuracy_m:.0} m (limit {limit_m:.0} m)")]
    LowAccuracy { accuracy_m: f64, limit_m: f64 },

    /// The device is outside the target's geofence.
    #[error("outside geofence: {distance_m:.1} m from target (radius {radius_m:.0} m)")]
    OutsideGeofence { distance_m: f64, radius_m: f64 },

    #[error("invalid visit transition: cannot go from {from} to {to}")]
    InvalidTransition { from: VisitStatus, to: VisitStatus },

    #[error("check-in requires a captured photo attachment")]
    AttachmentMissing,

    #[error("location error: {0}")]
    Location(LocationError),

    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] beat_core::Error),
}

/// A specialized Result type for beatsync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
