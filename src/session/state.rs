//! Stream session lifecycle.
//!
//! ```text
//! initializing ──validate──► ready ◄──resume── paused
//!      │                      │  └───pause────►  │
//!      │ fail                 └──end──► ending ◄─┘ end
//!      ▼                                  │ drained
//!  completed ◄────────────────────────────┘
//! ```

use crate::error::{DubError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Config received, not yet validated.
    Initializing,
    /// Accepting fragments.
    Ready,
    /// In-flight fragments continue; new ones are rejected.
    Paused,
    /// No new fragments; draining in-flight work.
    Ending,
    Completed,
}

/// Lifecycle requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequest {
    Validated,
    ValidationFailed,
    Pause,
    Resume,
    End,
    Drained,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Paused => "paused",
            SessionState::Ending => "ending",
            SessionState::Completed => "completed",
        }
    }

    /// Next state for `request`, or an error if the request is not allowed.
    ///
    /// Pausing a paused stream and resuming a ready one are no-ops.
    pub fn transition(self, request: SessionRequest) -> Result<SessionState> {
        use SessionRequest::*;
        use SessionState::*;

        let next = match (self, request) {
            (Initializing, Validated) => Ready,
            (Initializing, ValidationFailed) => Completed,
            (Ready | Paused, Pause) => Paused,
            (Ready | Paused, Resume) => Ready,
            (Ready | Paused, End) => Ending,
            (Ending, Drained) => Completed,
            (from, request) => {
                return Err(DubError::InvalidTransition {
                    from: from.as_str().to_string(),
                    request: request.as_str().to_string(),
                });
            }
        };
        Ok(next)
    }

    pub fn accepts_fragments(&self) -> bool {
        *self == SessionState::Ready
    }

    pub fn is_terminal(&self) -> bool {
        *self == SessionState::Completed
    }
}

impl SessionRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRequest::Validated => "validated",
            SessionRequest::ValidationFailed => "validation_failed",
            SessionRequest::Pause => "pause",
            SessionRequest::Resume => "resume",
            SessionRequest::End => "end",
            SessionRequest::Drained => "drained",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
