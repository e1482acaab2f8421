// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Idempotency tokens for queued operations.
//!
//! Every mutating operation recorded while offline carries an [`OpToken`]
//! derived from the client clock. The token is sent to the server on every
//! delivery attempt of the same entry, so retried deliveries deduplicate
//! server-side: at-least-once delivery, exactly-once effect.
//!
//! Format: `{wall_ms}-{seq}-{device_id}`
//!
//! Ordering rules:
//! 1. Higher wall_ms wins
//! 2. If wall_ms equal, higher seq wins
//! 3. If both equal, higher device_id wins (deterministic tiebreaker)

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// A creation-time-derived unique operation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpToken {
    /// Wall clock time in milliseconds since Unix epoch.
    pub wall_ms: u64,
    /// Sequence number for operations created at the same wall time.
    pub seq: u32,
    /// Device identifier for deterministic tiebreaking.
    pub device_id: u32,
}

impl OpToken {
    /// Creates a new token with the given components.
    pub fn new(wall_ms: u64, seq: u32, device_id: u32) -> Self {
        OpToken {
            wall_ms,
            seq,
            device_id,
        }
    }

    /// Parses a token from its string representation.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl Ord for OpToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wall_ms
            .cmp(&other.wall_ms)
            .then_with(|| self.seq.cmp(&other.seq))
            .then_with(|| self.device_id.cmp(&other.device_id))
    }
}

impl PartialOrd for OpToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.wall_ms, self.seq, self.device_id)
    }
}

impl FromStr for OpToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(Error::InvalidToken(format!(
                "expected format 'wall_ms-seq-device_id', got '{s}'"
            )));
        }

        let wall_ms = parts[0]
            .parse::<u64>()
            .map_err(|_| Error::InvalidToken(format!("invalid wall_ms '{}' in '{s}'", parts[0])))?;

        let seq = parts[1]
            .parse::<u32>()
            .map_err(|_| Error::InvalidToken(format!("invalid seq '{}' in '{s}'", parts[1])))?;

        let device_id = parts[2].parse::<u32>().map_err(|_| {
            Error::InvalidToken(format!("invalid device_id '{}' in '{s}'", parts[2]))
        })?;

        Ok(OpToken::new(wall_ms, seq, device_id))
    }
}

/// Trait for getting the current wall clock time.
///
/// This allows injecting a mock clock for testing.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using `std::time::SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now_ms(&self) -> u64 {
        (*self).now_ms()
    }
}

/// A generator that produces monotonically increasing operation tokens.
///
/// Thread-safe. Two tokens minted on the same device are never equal even
/// if the wall clock stalls or goes backwards: the sequence counter advances
/// whenever wall time fails to.
pub struct TokenClock<C: ClockSource = SystemClock> {
    clock: C,
    device_id: u32,
    last_wall_ms: Mutex<u64>,
    last_seq: AtomicU32,
}

impl TokenClock<SystemClock> {
    /// Creates a new token clock with the system clock and given device ID.
    pub fn new(device_id: u32) -> Self {
        Self::with_clock(SystemClock, device_id)
    }
}

impl<C: ClockSource> TokenClock<C> {
    /// Creates a new token clock with a custom clock source.
    pub fn with_clock(clock: C, device_id: u32) -> Self {
        TokenClock {
            clock,
            device_id,
            last_wall_ms: Mutex::new(0),
            last_seq: AtomicU32::new(0),
        }
    }

    /// Returns the device ID for this clock.
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    /// Mints a new token.
    ///
    /// Guarantees strictly increasing tokens even if the wall clock goes
    /// backwards.
    pub fn mint(&self) -> OpToken {
        let physical = self.clock.now_ms();
        let mut last_ms = self.last_wall_ms.lock().unwrap_or_else(|e| e.into_inner());

        let (wall_ms, seq) = if physical > *last_ms {
            // Normal case: wall clock advanced
            *last_ms = physical;
            self.last_seq.store(0, AtomicOrdering::SeqCst);
            (physical, 0)
        } else {
            // Clock went backwards or stayed same: increment sequence
            let seq = self.last_seq.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            (*last_ms, seq)
        };

        OpToken::new(wall_ms, seq, self.device_id)
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
