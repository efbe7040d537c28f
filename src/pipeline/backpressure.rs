//! Per-stream in-flight counter and flow-control signal.
//!
//! A fragment counts as in flight from acceptance until its result is
//! delivered to the caller, including the time it sits completed in the
//! ordering queue behind a slower predecessor.
//!
//! Severity changes in either direction produce a notification. The
//! notification on the way back down to `low` is what lets a paused caller
//! resume, so it must never be suppressed.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// How loaded the stream is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// What the caller should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    None,
    SlowDown,
    Pause,
}

impl From<Severity> for FlowAction {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => FlowAction::None,
            Severity::Medium => FlowAction::SlowDown,
            Severity::High => FlowAction::Pause,
        }
    }
}

/// Snapshot of the tracker, as sent in `backpressure` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureState {
    pub current_inflight: usize,
    pub max_inflight: usize,
    pub severity: Severity,
    pub action: FlowAction,
}

/// Severity boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureThresholds {
    /// In-flight count at which severity becomes medium.
    pub medium_at: usize,
    /// In-flight count at which severity becomes high.
    pub high_at: usize,
    /// In-flight count above which new fragments are rejected.
    pub reject_above: usize,
}

impl Default for BackpressureThresholds {
    fn default() -> Self {
        Self {
            medium_at: defaults::BACKPRESSURE_MEDIUM_AT,
            high_at: defaults::BACKPRESSURE_HIGH_AT,
            reject_above: defaults::BACKPRESSURE_REJECT_ABOVE,
        }
    }
}

impl BackpressureThresholds {
    /// Monotonic mapping from in-flight count to severity.
    pub fn severity(&self, in_flight: usize) -> Severity {
        if in_flight >= self.high_at {
            Severity::High
        } else if in_flight >= self.medium_at {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.medium_at == 0 {
            return Err("medium_at must be at least 1".to_string());
        }
        if self.medium_at > self.high_at {
            return Err(format!(
                "medium_at ({}) must not exceed high_at ({})",
                self.medium_at, self.high_at
            ));
        }
        if self.high_at > self.reject_above {
            return Err(format!(
                "high_at ({}) must not exceed reject_above ({})",
                self.high_at, self.reject_above
            ));
        }
        Ok(())
    }
}

/// Counts fragments accepted but not yet delivered.
#[derive(Debug, Clone)]
pub struct BackpressureTracker {
    in_flight: usize,
    max_inflight: usize,
    thresholds: BackpressureThresholds,
    severity: Severity,
}

impl BackpressureTracker {
    pub fn new(max_inflight: usize, thresholds: BackpressureThresholds) -> Self {
        Self {
            in_flight: 0,
            max_inflight,
            severity: thresholds.severity(0),
            thresholds,
        }
    }

    /// True when accepting one more fragment would exceed the hard limit.
    pub fn should_reject(&self) -> bool {
        self.in_flight >= self.thresholds.reject_above
    }

    /// Records an accepted fragment. Returns the new state if severity changed.
    pub fn on_accept(&mut self) -> Option<BackpressureState> {
        self.in_flight += 1;
        self.transition()
    }

    /// Records a delivered fragment. Returns the new state if severity changed.
    pub fn on_deliver(&mut self) -> Option<BackpressureState> {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.transition()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn state(&self) -> BackpressureState {
        BackpressureState {
            current_inflight: self.in_flight,
            max_inflight: self.max_inflight,
            severity: self.severity,
            action: self.severity.into(),
        }
    }

    fn transition(&mut self) -> Option<BackpressureState> {
        let severity = self.thresholds.severity(self.in_flight);
        if severity == self.severity {
            return None;
        }
        self.severity = severity;
        Some(self.state())
    }
}
