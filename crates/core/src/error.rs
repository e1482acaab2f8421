// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for beat-core operations.

use thiserror::Error;

/// All possible errors that can occur in beat-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate key: a record with local id '{0}' already exists")]
    DuplicateKey(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("queue entry not found: {0}")]
    EntryNotFound(String),

    #[error("invalid entity kind: '{0}'\n  hint: valid kinds are: visit-plan, customer, geo-mapping")]
    InvalidEntityKind(String),

    #[error("invalid sync status: '{0}'\n  hint: valid statuses are: pending, synced")]
    InvalidSyncStatus(String),

    #[error("invalid visit status: '{0}'\n  hint: valid statuses are: planned, checked_in, checked_out")]
    InvalidVisitStatus(String),

    #[error("invalid operation kind: '{0}'")]
    InvalidOpKind(String),

    #[error("invalid method: '{0}'\n  hint: valid methods are: GET, POST, PUT")]
    InvalidMethod(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

/// A specialized Result type for beat-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
