// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Network reachability monitoring.
//!
//! The platform layer owns actual reachability detection and feeds
//! transitions into [`ConnectivityMonitor::set_online`]. The monitor is
//! push-based: subscribers are notified on every transition, and rapid
//! flapping collapses to "last event wins" for the current state. The
//! auto-sync controller debounces with a settle window on top of this, so
//! a flap storm triggers at most one drain.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Current reachability state plus a transition broadcast channel.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        ConnectivityMonitor {
            online: AtomicBool::new(initially_online),
            tx,
        }
    }

    /// Current reachability.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Record a reachability change from the platform.
    ///
    /// Only actual transitions notify subscribers; repeating the current
    /// state is a no-op.
    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::AcqRel) != online {
            let _ = self.tx.send(online);
        }
    }

    /// Subscribe to transitions.
    ///
    /// The receiver observes the latest state only; intermediate flaps may
    /// be skipped.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "connectivity_tests.rs"]
mod tests;
