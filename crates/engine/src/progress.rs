// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Weighted multi-step progress tracking for sync runs.
//!
//! A sync run declares its steps up front with weights summing to 100.
//! The tracker emits percentages and step messages through an injected
//! [`ProgressSink`]; the embedding app renders them however it likes.
//! Percentages are clamped to [0, 100] and never move backwards, except
//! that [`ProgressTracker::complete`] always forces 100 regardless of any
//! in-flight interpolation.

use std::sync::Arc;

use crate::error::{SyncError, SyncResult};

/// Receiver for progress updates. Injected at construction; defaults to
/// [`NoopSink`].
pub trait ProgressSink: Send + Sync {
    /// A new overall percentage, 0-100.
    fn on_progress(&self, _percent: u8) {}

    /// A new user-facing status message.
    fn on_message(&self, _message: &str) {}
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {}

/// One named step of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStep {
    pub name: String,
    /// Share of the run, 0-100.
    pub weight: u8,
    /// Overall percentage when the step begins.
    pub start_progress: u8,
    /// Overall percentage when the step ends.
    pub end_progress: u8,
}

/// Computes weighted percentages across named steps.
pub struct ProgressTracker {
    steps: Vec<SyncStep>,
    index: usize,
    current: u8,
    sink: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("steps", &self.steps)
            .field("index", &self.index)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Build a tracker from `(name, weight)` pairs.
    ///
    /// Weights must sum to exactly 100.
    pub fn new(steps: &[(&str, u8)], sink: Arc<dyn ProgressSink>) -> SyncResult<Self> {
        if steps.is_empty() {
            return Err(SyncError::InvalidSteps("at least one step required".into()));
        }

        let total: u32 = steps.iter().map(|(_, w)| u32::from(*w)).sum();
        if total != 100 {
            return Err(SyncError::InvalidSteps(format!(
                "weights must sum to 100, got {total}"
            )));
        }

        let mut built = Vec::with_capacity(steps.len());
        let mut acc: u8 = 0;
        for (name, weight) in steps {
            let start = acc;
            acc = acc.saturating_add(*weight);
            built.push(SyncStep {
                name: (*name).to_string(),
                weight: *weight,
                start_progress: start,
                end_progress: acc,
            });
        }

        Ok(ProgressTracker {
            steps: built,
            index: 0,
            current: 0,
            sink,
        })
    }

    /// Build a tracker with the weight split evenly; the last step absorbs
    /// the remainder.
    pub fn equal_weights(names: &[&str], sink: Arc<dyn ProgressSink>) -> SyncResult<Self> {
        if names.is_empty() {
            return Err(SyncError::InvalidSteps("at least one step required".into()));
        }

        let n = names.len();
        let share = (100 / n) as u8;
        let steps: Vec<(&str, u8)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let weight = if i == n - 1 {
                    100 - share * (n as u8 - 1)
                } else {
                    share
                };
                (*name, weight)
            })
            .collect();

        Self::new(&steps, sink)
    }

    /// The declared steps.
    pub fn steps(&self) -> &[SyncStep] {
        &self.steps
    }

    /// The last emitted percentage.
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Name of the active step.
    pub fn current_step_name(&self) -> &str {
        &self.steps[self.index.min(self.steps.len() - 1)].name
    }

    /// Begin the run: emits the first step's message and its starting
    /// percentage (0).
    pub fn start(&mut self) {
        self.index = 0;
        self.sink.on_message(&self.steps[0].name);
        self.emit(f64::from(self.steps[0].start_progress));
    }

    /// Advance to the next step, emitting its message and starting
    /// percentage. Calling past the last step stays on it.
    pub fn next_step(&mut self) {
        if self.index + 1 < self.steps.len() {
            self.index += 1;
        }
        let step = &self.steps[self.index];
        self.sink.on_message(&step.name);
        self.emit(f64::from(step.start_progress));
    }

    /// Interpolate within the active step: `fraction` in [0, 1] maps onto
    /// the step's percentage range. Used to animate long steps smoothly.
    pub fn step_fraction(&mut self, fraction: f64) {
        let step = &self.steps[self.index];
        let span = f64::from(step.end_progress) - f64::from(step.start_progress);
        let p = f64::from(step.start_progress) + span * fraction.clamp(0.0, 1.0);
        self.emit(p);
    }

    /// Force completion: always emits 100, regardless of the active step
    /// or any interpolation in flight.
    pub fn complete(&mut self) {
        self.index = self.steps.len() - 1;
        self.current = 100;
        self.sink.on_progress(100);
    }

    /// Clamp to [0, 100], never move backwards, notify the sink.
    fn emit(&mut self, value: f64) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let clamped = value.round().clamp(0.0, 100.0) as u8;
        if clamped > self.current {
            self.current = clamped;
        }
        self.sink.on_progress(self.current);
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
