// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed local store for mirrored entities.
//!
//! The [`LocalStore`] struct provides all data access for the mirrored
//! entity tables and (via `queue.rs`) the durable sync queue. One table per
//! [`EntityKind`], all with the same shape: client id, optional server id,
//! row sequence, JSON payload, sync status, update timestamp.
//!
//! Every mutating call commits before returning, so an acknowledged write
//! survives a process kill.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::entity::{EntityKind, MirroredRecord, SyncStatus};
use crate::error::{Error, Result};

/// SQL schema for the local mirror database.
pub const SCHEMA: &str = r#"
-- One table per mirrored entity kind; identical shape.
CREATE TABLE IF NOT EXISTS visit_plans (
    local_id TEXT PRIMARY KEY,
    remote_id INTEGER,
    row_sequence INTEGER,
    payload TEXT NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    local_id TEXT PRIMARY KEY,
    remote_id INTEGER,
    row_sequence INTEGER,
    payload TEXT NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS geo_mappings (
    local_id TEXT PRIMARY KEY,
    remote_id INTEGER,
    row_sequence INTEGER,
    payload TEXT NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    updated_at TEXT NOT NULL
);

-- Durable queue of operations awaiting delivery to the server.
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    method TEXT NOT NULL,
    data TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_visit_plans_status ON visit_plans(sync_status);
CREATE INDEX IF NOT EXISTS idx_customers_status ON customers(sync_status);
CREATE INDEX IF NOT EXISTS idx_geo_mappings_status ON geo_mappings(sync_status);
CREATE INDEX IF NOT EXISTS idx_visit_plans_remote ON visit_plans(remote_id);
CREATE INDEX IF NOT EXISTS idx_customers_remote ON customers(remote_id);
CREATE INDEX IF NOT EXISTS idx_geo_mappings_remote ON geo_mappings(remote_id);
CREATE INDEX IF NOT EXISTS idx_queue_entity ON sync_queue(kind, entity_id);
CREATE INDEX IF NOT EXISTS idx_queue_created ON sync_queue(created_at);
"#;

/// Parse a string value from the database, returning a rusqlite error on parse failure.
pub(crate) fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid value '{value}' in column '{column}'"
            ))),
        )
    })
}

/// Parse an RFC3339 timestamp from the database.
pub(crate) fn parse_timestamp(
    value: &str,
    column: &str,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(Error::CorruptedData(format!(
                    "invalid timestamp '{value}' in column '{column}'"
                ))),
            )
        })
}

/// Parse a JSON payload column.
pub(crate) fn parse_payload(
    value: &str,
    column: &str,
) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    serde_json::from_str(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid JSON in column '{column}'"
            ))),
        )
    })
}

/// Run schema creation and all migrations on a database connection.
///
/// This is the single migration path for every consumer of the store. It
/// applies the canonical schema and runs idempotent migrations to upgrade
/// older databases that may be missing columns.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    migrate_add_row_sequence(conn)?;
    Ok(())
}

/// Migration: add the row_sequence column to entity tables created before
/// it existed.
fn migrate_add_row_sequence(conn: &Connection) -> Result<()> {
    for kind in EntityKind::ALL {
        let has_column: bool = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) > 0 FROM pragma_table_info('{}') WHERE name = 'row_sequence'",
                    kind.table()
                ),
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_column {
            let sql = format!("ALTER TABLE {} ADD COLUMN row_sequence INTEGER", kind.table());
            conn.execute(&sql, [])?;
        }
    }
    Ok(())
}

/// Map a row of the common entity-table shape into a [`MirroredRecord`].
fn record_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<MirroredRecord, rusqlite::Error> {
    let payload_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(MirroredRecord {
        local_id: row.get(0)?,
        remote_id: row.get(1)?,
        row_sequence: row.get(2)?,
        payload: parse_payload(&payload_str, "payload")?,
        sync_status: parse_db(&status_str, "sync_status")?,
        updated_at: parse_timestamp(&updated_str, "updated_at")?,
    })
}

const RECORD_COLUMNS: &str = "local_id, remote_id, row_sequence, payload, sync_status, updated_at";

/// SQLite connection with mirrored-entity and sync-queue operations.
pub struct LocalStore {
    /// The underlying SQLite connection.
    pub conn: Connection,
}

impl LocalStore {
    /// Open a store at the given path, creating and migrating if needed.
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL for durability without blocking readers
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = LocalStore { conn };
        run_migrations(&store.conn)?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = LocalStore { conn };
        run_migrations(&store.conn)?;
        Ok(store)
    }

    /// Insert a new record.
    ///
    /// Assigns the next `row_sequence` for the table. Fails with
    /// [`Error::DuplicateKey`] if the local id is already present.
    pub fn insert(&self, kind: EntityKind, record: &MirroredRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {t} (local_id, remote_id, row_sequence, payload, sync_status, updated_at)
             VALUES (?1, ?2,
                     (SELECT COALESCE(MAX(row_sequence), 0) + 1 FROM {t}),
                     ?3, ?4, ?5)",
            t = kind.table()
        );

        let result = self.conn.execute(
            &sql,
            params![
                record.local_id,
                record.remote_id,
                record.payload.to_string(),
                record.sync_status.as_str(),
                record.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::DuplicateKey(record.local_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merge fields into a record's payload.
    ///
    /// `patch` must be a JSON object; its top-level fields replace the
    /// matching payload fields. Bumps `updated_at` and resets the record to
    /// pending, since the server has not seen the new state.
    pub fn update(&self, kind: EntityKind, local_id: &str, patch: &serde_json::Value) -> Result<()> {
        let fields = patch
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("update patch must be a JSON object".into()))?;

        let current = self
            .get(kind, local_id)?
            .ok_or_else(|| Error::RecordNotFound(format!("{kind} {local_id}")))?;

        let mut payload = current.payload;
        match payload.as_object_mut() {
            Some(map) => {
                for (k, v) in fields {
                    map.insert(k.clone(), v.clone());
                }
            }
            None => return Err(Error::CorruptedData(format!("payload of {kind} {local_id} is not an object"))),
        }

        self.conn.execute(
            &format!(
                "UPDATE {} SET payload = ?1, sync_status = 'pending', updated_at = ?2 WHERE local_id = ?3",
                kind.table()
            ),
            params![payload.to_string(), Utc::now().to_rfc3339(), local_id],
        )?;
        Ok(())
    }

    /// Get a record by local id.
    pub fn get(&self, kind: EntityKind, local_id: &str) -> Result<Option<MirroredRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {} WHERE local_id = ?1",
                    kind.table()
                ),
                params![local_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Get a record by server id. Explicit absence, not an error.
    pub fn get_by_remote_id(&self, kind: EntityKind, remote_id: i64) -> Result<Option<MirroredRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {} WHERE remote_id = ?1",
                    kind.table()
                ),
                params![remote_id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Get a record by storage row position.
    ///
    /// Legacy fallback used when the server references a record by a
    /// position-derived key. Row positions shift on deletes; nothing may
    /// persist one as a reference.
    pub fn get_by_row_sequence(&self, kind: EntityKind, seq: i64) -> Result<Option<MirroredRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {} WHERE row_sequence = ?1",
                    kind.table()
                ),
                params![seq],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All pending records of a kind, ordered by `updated_at` ascending.
    pub fn get_pending(&self, kind: EntityKind) -> Result<Vec<MirroredRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE sync_status = 'pending' ORDER BY updated_at",
            kind.table()
        ))?;

        let records = stmt
            .query_map([], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Atomic pending -> synced transition, recording the server id.
    ///
    /// Fails with [`Error::RecordNotFound`] if the record is missing (it may
    /// have been purged by a reset); callers must not treat that as fatal.
    pub fn mark_synced(&self, kind: EntityKind, local_id: &str, remote_id: i64) -> Result<()> {
        self.conn.execute(
            &format!(
                "UPDATE {} SET sync_status = 'synced', remote_id = ?1, updated_at = ?2 WHERE local_id = ?3",
                kind.table()
            ),
            params![remote_id, Utc::now().to_rfc3339(), local_id],
        )?;
        if self.conn.changes() == 0 {
            return Err(Error::RecordNotFound(format!("{kind} {local_id}")));
        }
        Ok(())
    }

    /// Flip a record pending -> synced after an update-style delivery was
    /// acknowledged.
    ///
    /// Unlike [`LocalStore::mark_synced`] this keeps the record's existing
    /// server id. A record that does not carry one yet (its creation has
    /// not been acknowledged) stays pending, preserving the invariant that
    /// synced records have a remote id. Returns whether the flip happened.
    pub fn mark_update_synced(&self, kind: EntityKind, local_id: &str) -> Result<bool> {
        self.conn.execute(
            &format!(
                "UPDATE {} SET sync_status = 'synced', updated_at = ?1
                 WHERE local_id = ?2 AND remote_id IS NOT NULL",
                kind.table()
            ),
            params![Utc::now().to_rfc3339(), local_id],
        )?;
        Ok(self.conn.changes() > 0)
    }

    /// Upsert a server-confirmed record during a remote pull.
    ///
    /// A record that is locally `pending` is left untouched: the queue is
    /// the source of truth for edits the server has not received yet.
    /// Returns true if the local row was written.
    pub fn apply_remote(
        &self,
        kind: EntityKind,
        remote_id: i64,
        local_id_hint: &str,
        payload: &serde_json::Value,
    ) -> Result<bool> {
        if let Some(existing) = self.get_by_remote_id(kind, remote_id)? {
            if existing.sync_status == SyncStatus::Pending {
                return Ok(false);
            }
            self.conn.execute(
                &format!(
                    "UPDATE {} SET payload = ?1, updated_at = ?2 WHERE local_id = ?3",
                    kind.table()
                ),
                params![
                    payload.to_string(),
                    Utc::now().to_rfc3339(),
                    existing.local_id
                ],
            )?;
            return Ok(true);
        }

        // First sight of this server record: mirror it as synced.
        let record = MirroredRecord {
            local_id: local_id_hint.to_string(),
            remote_id: Some(remote_id),
            row_sequence: None,
            payload: payload.clone(),
            sync_status: SyncStatus::Synced,
            updated_at: Utc::now(),
        };
        match self.insert(kind, &record) {
            Ok(()) => Ok(true),
            // Same local id already mirrored but under a different remote id:
            // leave the local row alone rather than resurrect.
            Err(Error::DuplicateKey(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Count of records of a kind.
    pub fn count(&self, kind: EntityKind) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Destructive wipe of one entity table.
    ///
    /// Only for controlled app-lifecycle points (forced cache invalidation).
    /// The sync controller refuses to call this while a run is in flight.
    pub fn reset_table(&self, kind: EntityKind) -> Result<()> {
        self.conn
            .execute(&format!("DELETE FROM {}", kind.table()), [])?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
