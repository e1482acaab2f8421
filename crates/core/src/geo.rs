// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Great-circle geometry for geofence checks.
//!
//! Haversine on a spherical earth (mean radius 6 371 000 m). Adequate at
//! the sub-kilometer distances a geofence deals in; no ellipsoidal
//! correction.

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLon { lat, lon }
    }
}

/// Great-circle distance between two points, in meters.
pub fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

#[cfg(test)]
#[path = "geo_tests.rs"]
mod tests;
