// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Mirrored entity types for the beat sync engine.
//!
//! This module contains the fundamental data types: MirroredRecord,
//! EntityKind, SyncStatus, VisitStatus, and the per-kind payloads
//! (VisitPlan, Customer, GeoMapping).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The server-owned entity kinds mirrored into the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A scheduled visit to a customer on a sales beat.
    VisitPlan,
    /// An outlet/customer on the beat, including its geofence target.
    Customer,
    /// Auxiliary field-captured coordinates for a customer.
    GeoMapping,
}

impl EntityKind {
    /// All mirrored kinds, in the order the controller pulls them.
    pub const ALL: [EntityKind; 3] = [
        EntityKind::VisitPlan,
        EntityKind::Customer,
        EntityKind::GeoMapping,
    ];

    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::VisitPlan => "visit-plan",
            EntityKind::Customer => "customer",
            EntityKind::GeoMapping => "geo-mapping",
        }
    }

    /// Returns the local store table holding this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::VisitPlan => "visit_plans",
            EntityKind::Customer => "customers",
            EntityKind::GeoMapping => "geo_mappings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "visit-plan" => Ok(EntityKind::VisitPlan),
            "customer" => Ok(EntityKind::Customer),
            "geo-mapping" => Ok(EntityKind::GeoMapping),
            _ => Err(Error::InvalidEntityKind(s.to_string())),
        }
    }
}

/// Whether the server has acknowledged the latest local state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The record (or an update to it) has not been acknowledged yet.
    Pending,
    /// The server has acknowledged the record; `remote_id` is populated.
    Synced,
}

impl SyncStatus {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            _ => Err(Error::InvalidSyncStatus(s.to_string())),
        }
    }
}

/// Attendance state of a visit plan.
///
/// `planned -> checked_in -> checked_out`, with checked_out terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    /// Scheduled, not yet started.
    Planned,
    /// The rep is on site; check-in passed the geofence.
    CheckedIn,
    /// The visit is finished. Terminal.
    CheckedOut,
}

impl VisitStatus {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Planned => "planned",
            VisitStatus::CheckedIn => "checked_in",
            VisitStatus::CheckedOut => "checked_out",
        }
    }

    /// Check if a transition from this status to target is valid.
    pub fn can_transition_to(&self, target: VisitStatus) -> bool {
        matches!(
            (self, target),
            (VisitStatus::Planned, VisitStatus::CheckedIn)
                | (VisitStatus::CheckedIn, VisitStatus::CheckedOut)
        )
    }
}

impl fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VisitStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "planned" => Ok(VisitStatus::Planned),
            "checked_in" => Ok(VisitStatus::CheckedIn),
            "checked_out" => Ok(VisitStatus::CheckedOut),
            _ => Err(Error::InvalidVisitStatus(s.to_string())),
        }
    }
}

/// A local copy of a server-owned entity, tagged with sync status.
///
/// The payload is entity-specific JSON; use the typed payload structs below
/// for reading and writing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredRecord {
    /// Stable client-generated identifier. Unique, immutable after creation.
    pub local_id: String,
    /// Server identifier, populated once the server confirms creation.
    pub remote_id: Option<i64>,
    /// Monotonic local storage position. Legacy fallback lookup key only:
    /// row positions shift on deletes and must never be persisted as a
    /// reference to a record.
    pub row_sequence: Option<i64>,
    /// Entity-specific fields.
    pub payload: serde_json::Value,
    /// Whether the server has acknowledged the latest local state.
    pub sync_status: SyncStatus,
    /// Client-side timestamp of the last local mutation.
    pub updated_at: DateTime<Utc>,
}

impl MirroredRecord {
    /// Creates a new pending record with no remote identity.
    pub fn new(local_id: impl Into<String>, payload: serde_json::Value) -> Self {
        MirroredRecord {
            local_id: local_id.into(),
            remote_id: None,
            row_sequence: None,
            payload,
            sync_status: SyncStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Deserializes the payload into a typed view.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Payload for a visit plan record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitPlan {
    /// Local id of the customer being visited.
    pub customer_local_id: String,
    /// Scheduled visit date (client timezone handled upstream).
    pub visit_date: String,
    /// Attendance state.
    pub status: VisitStatus,
    /// When the rep checked in, if they have.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_at: Option<DateTime<Utc>>,
    /// When the rep checked out, if they have.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out_at: Option<DateTime<Utc>>,
    /// Free-form visit note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl VisitPlan {
    /// Serializes into a record payload.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Geofence radius applied when a customer has none configured (meters).
pub const DEFAULT_GEOFENCE_RADIUS_M: f64 = 100.0;

/// Smallest radius a customer may configure (meters). Anything below is
/// clamped up to keep GPS jitter from rejecting every check-in.
pub const MIN_GEOFENCE_RADIUS_M: f64 = 50.0;

/// Payload for a customer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub address: String,
    /// Recorded coordinates of the outlet, degrees.
    pub lat: f64,
    pub lon: f64,
    /// Configured geofence radius in meters. `None` means the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geofence_radius_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Customer {
    /// Serializes into a record payload.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Effective geofence radius: configured value clamped to the enforced
    /// minimum, or the default when unconfigured.
    pub fn effective_radius_m(&self) -> f64 {
        self.geofence_radius_m
            .map(|r| r.max(MIN_GEOFENCE_RADIUS_M))
            .unwrap_or(DEFAULT_GEOFENCE_RADIUS_M)
    }
}

/// Payload for an auxiliary geo-mapping record captured in the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoMapping {
    /// Local id of the customer these coordinates belong to.
    pub customer_local_id: String,
    pub lat: f64,
    pub lon: f64,
    pub captured_at: DateTime<Utc>,
}

impl GeoMapping {
    /// Serializes into a record payload.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
