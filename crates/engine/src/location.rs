// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Location provider abstraction.
//!
//! The platform's positioning stack sits behind this trait so the
//! attendance state machine can be tested with scripted fixes.

use std::future::Future;
use std::pin::Pin;

/// Error type for location fixes.
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    /// The user denied location access.
    #[error("location permission denied")]
    PermissionDenied,

    /// No fix arrived in time.
    #[error("location fix timed out")]
    Timeout,
}

/// A position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Degrees.
    pub lat: f64,
    /// Degrees.
    pub lon: f64,
    /// Reported accuracy radius in meters.
    pub accuracy_m: f64,
}

/// How hard the provider should work for the fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyHint {
    /// Full-precision fix; geofence checks need this.
    High,
    /// Cheap approximate fix.
    Coarse,
}

/// Platform positioning behind an injectable trait.
pub trait LocationProvider: Send + Sync {
    /// Resolve the device's current position.
    fn current_position(
        &self,
        hint: AccuracyHint,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<Position, LocationError>> + Send + '_>>;
}
