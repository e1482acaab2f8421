// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Durable queue of operations awaiting delivery to the server.
//!
//! Every mutating user action performed while disconnected becomes a
//! [`QueueEntry`] in the `sync_queue` table, committed before the action is
//! acknowledged to the UI. Entries drain in FIFO order; entries for the
//! same (kind, entity) are never reordered relative to each other. The
//! entry's [`OpToken`] id is resent on every delivery attempt so the server
//! can deduplicate replays.
//!
//! The drain loop lives in the engine crate (delivery is network I/O);
//! this module provides the storage operations it is built on.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::store::{parse_db, parse_payload, parse_timestamp, LocalStore};
use crate::token::OpToken;

/// The kinds of operation the app records for later delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    CreateVisitPlan,
    CheckIn,
    CheckOut,
    CreateCustomer,
    CreateGeoMapping,
    CreateStockAdjustment,
}

impl OpKind {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::CreateVisitPlan => "create-visit-plan",
            OpKind::CheckIn => "check-in",
            OpKind::CheckOut => "check-out",
            OpKind::CreateCustomer => "create-customer",
            OpKind::CreateGeoMapping => "create-geo-mapping",
            OpKind::CreateStockAdjustment => "create-stock-adjustment",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "create-visit-plan" => Ok(OpKind::CreateVisitPlan),
            "check-in" => Ok(OpKind::CheckIn),
            "check-out" => Ok(OpKind::CheckOut),
            "create-customer" => Ok(OpKind::CreateCustomer),
            "create-geo-mapping" => Ok(OpKind::CreateGeoMapping),
            "create-stock-adjustment" => Ok(OpKind::CreateStockAdjustment),
            _ => Err(Error::InvalidOpKind(s.to_string())),
        }
    }
}

/// HTTP method of the target remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    /// Returns the string representation used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }
}

/// A durable record of a pending mutating action destined for the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Idempotency token; sent on every delivery attempt.
    pub id: OpToken,
    /// Operation kind.
    pub kind: OpKind,
    /// Local id of the entity this operation belongs to. Together with
    /// `kind` this is the FIFO ordering key.
    pub entity_id: String,
    /// Target path on the remote API.
    pub endpoint: String,
    /// Target method on the remote API.
    pub method: Method,
    /// Operation payload, including references to local record ids.
    pub data: serde_json::Value,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Creation time; FIFO order within an entity.
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Creates a fresh entry with zero attempts.
    pub fn new(
        id: OpToken,
        kind: OpKind,
        entity_id: impl Into<String>,
        endpoint: impl Into<String>,
        method: Method,
        data: serde_json::Value,
    ) -> Self {
        QueueEntry {
            id,
            kind,
            entity_id: entity_id.into(),
            endpoint: endpoint.into(),
            method,
            data,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<QueueEntry, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let method_str: String = row.get(4)?;
    let data_str: String = row.get(5)?;
    let created_str: String = row.get(7)?;

    Ok(QueueEntry {
        id: parse_db(&id_str, "id")?,
        kind: parse_db(&kind_str, "kind")?,
        entity_id: row.get(2)?,
        endpoint: row.get(3)?,
        method: parse_db(&method_str, "method")?,
        data: parse_payload(&data_str, "data")?,
        attempts: row.get(6)?,
        created_at: parse_timestamp(&created_str, "created_at")?,
    })
}

const ENTRY_COLUMNS: &str = "id, kind, entity_id, endpoint, method, data, attempts, created_at";

impl LocalStore {
    /// Append an entry to the sync queue.
    ///
    /// Committed immediately; never touches the network.
    pub fn enqueue(&self, entry: &QueueEntry) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO sync_queue (id, kind, entity_id, endpoint, method, data, attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.to_string(),
                entry.kind.as_str(),
                entry.entity_id,
                entry.endpoint,
                entry.method.as_str(),
                entry.data.to_string(),
                entry.attempts,
                entry.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::DuplicateKey(entry.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All queued entries in FIFO order.
    pub fn pending_entries(&self) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue ORDER BY created_at, rowid"
        ))?;

        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Queued entries for one (kind, entity), in FIFO order.
    pub fn pending_entries_for(&self, kind: OpKind, entity_id: &str) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE kind = ?1 AND entity_id = ?2
             ORDER BY created_at, rowid"
        ))?;

        let entries = stmt
            .query_map(params![kind.as_str(), entity_id], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Increment an entry's attempt counter after a failed delivery.
    pub fn record_attempt(&self, id: &OpToken) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET attempts = attempts + 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        if self.conn.changes() == 0 {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Remove an entry after delivery (or permanent rejection).
    ///
    /// Returns whether the entry was present. Explicit absence, not an
    /// error: a crash between delivery and removal makes re-removal normal.
    pub fn remove_entry(&self, id: &OpToken) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM sync_queue WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Number of queued entries.
    pub fn queue_len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Whether the queue is empty.
    pub fn queue_is_empty(&self) -> Result<bool> {
        Ok(self.queue_len()? == 0)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
