//! Failure classification for pipeline stages.
//!
//! Every failure, wherever it happens, is reduced to a stable [`ErrorCode`],
//! the [`Stage`] it happened in, and whether the caller may resubmit the
//! identical fragment. Callers build retry logic on this table, so the
//! mapping in [`classify`] must stay stable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Recognition,
    Translation,
    Synthesis,
    /// Session-level checks (admission, lifecycle, configuration).
    Session,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Recognition => "recognition",
            Stage::Translation => "translation",
            Stage::Synthesis => "synthesis",
            Stage::Session => "session",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable error codes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ProcessingTimeout,
    RateLimited,
    UpstreamUnavailable,
    GpuOutOfMemory,
    InvalidAudio,
    UnsupportedLanguagePair,
    SynthesisFailed,
    DurationMismatchExceeded,
    InvalidConfig,
    BackpressureExceeded,
    StreamPaused,
    SessionNotReady,
    DuplicateSequence,
    SequenceOutOfWindow,
    StageUnavailable,
    ProtocolError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProcessingTimeout => "processing_timeout",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::GpuOutOfMemory => "gpu_out_of_memory",
            ErrorCode::InvalidAudio => "invalid_audio",
            ErrorCode::UnsupportedLanguagePair => "unsupported_language_pair",
            ErrorCode::SynthesisFailed => "synthesis_failed",
            ErrorCode::DurationMismatchExceeded => "duration_mismatch_exceeded",
            ErrorCode::InvalidConfig => "invalid_config",
            ErrorCode::BackpressureExceeded => "backpressure_exceeded",
            ErrorCode::StreamPaused => "stream_paused",
            ErrorCode::SessionNotReady => "session_not_ready",
            ErrorCode::DuplicateSequence => "duplicate_sequence",
            ErrorCode::SequenceOutOfWindow => "sequence_out_of_window",
            ErrorCode::StageUnavailable => "stage_unavailable",
            ErrorCode::ProtocolError => "protocol_error",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Back off and resubmit the identical fragment.
    Transient,
    /// Never retry; skip or fall back to the original audio.
    Permanent,
    /// The fragment was never attempted; wait for a recovery signal.
    FlowControl,
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryHint {
    BackOff,
    ReduceConcurrency,
    WaitForRecovery,
    Skip,
}

/// A failure as reported by a stage capability or detected by the coordinator.
///
/// Variants carry the details that matter for logs; [`classify`] reduces
/// them to the stable caller-facing contract.
#[derive(Debug, Clone, PartialEq)]
pub enum StageFailure {
    Timeout { after_ms: u64 },
    RateLimited { message: String },
    UpstreamUnavailable { message: String },
    GpuOutOfMemory { message: String },
    InvalidAudio { message: String },
    UnsupportedLanguagePair { source: String, target: String },
    SynthesisFailed { message: String },
    DurationMismatch { variance: f64 },
    InvalidConfig { message: String },
    BackpressureExceeded { in_flight: usize },
    StreamPaused,
    SessionNotReady { message: String },
    DuplicateSequence { sequence_number: u64 },
    SequenceOutOfWindow {
        sequence_number: u64,
        next_expected: u64,
    },
    StageUnavailable { message: String },
    Internal { message: String },
}

impl StageFailure {
    /// Stable code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            StageFailure::Timeout { .. } => ErrorCode::ProcessingTimeout,
            StageFailure::RateLimited { .. } => ErrorCode::RateLimited,
            StageFailure::UpstreamUnavailable { .. } => ErrorCode::UpstreamUnavailable,
            StageFailure::GpuOutOfMemory { .. } => ErrorCode::GpuOutOfMemory,
            StageFailure::InvalidAudio { .. } => ErrorCode::InvalidAudio,
            StageFailure::UnsupportedLanguagePair { .. } => ErrorCode::UnsupportedLanguagePair,
            StageFailure::SynthesisFailed { .. } => ErrorCode::SynthesisFailed,
            StageFailure::DurationMismatch { .. } => ErrorCode::DurationMismatchExceeded,
            StageFailure::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            StageFailure::BackpressureExceeded { .. } => ErrorCode::BackpressureExceeded,
            StageFailure::StreamPaused => ErrorCode::StreamPaused,
            StageFailure::SessionNotReady { .. } => ErrorCode::SessionNotReady,
            StageFailure::DuplicateSequence { .. } => ErrorCode::DuplicateSequence,
            StageFailure::SequenceOutOfWindow { .. } => ErrorCode::SequenceOutOfWindow,
            StageFailure::StageUnavailable { .. } => ErrorCode::StageUnavailable,
            StageFailure::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Human-readable description.
    pub fn message(&self) -> String {
        match self {
            StageFailure::Timeout { after_ms } => {
                format!("stage did not finish within {after_ms}ms")
            }
            StageFailure::RateLimited { message }
            | StageFailure::UpstreamUnavailable { message }
            | StageFailure::GpuOutOfMemory { message }
            | StageFailure::InvalidAudio { message }
            | StageFailure::SynthesisFailed { message }
            | StageFailure::InvalidConfig { message }
            | StageFailure::SessionNotReady { message }
            | StageFailure::StageUnavailable { message }
            | StageFailure::Internal { message } => message.clone(),
            StageFailure::UnsupportedLanguagePair { source, target } => {
                format!("unsupported language pair {source} -> {target}")
            }
            StageFailure::DurationMismatch { variance } => {
                format!("duration variance {:.1}% exceeds hard limit", variance * 100.0)
            }
            StageFailure::BackpressureExceeded { in_flight } => {
                format!("{in_flight} fragments in flight, wait for recovery before resubmitting")
            }
            StageFailure::StreamPaused => "stream is paused".to_string(),
            StageFailure::DuplicateSequence { sequence_number } => {
                format!("sequence number {sequence_number} already in flight or delivered")
            }
            StageFailure::SequenceOutOfWindow {
                sequence_number,
                next_expected,
            } => format!(
                "sequence number {sequence_number} is too far ahead of next expected {next_expected}"
            ),
        }
    }
}

/// Classifier output: the caller-facing error contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub stage: Stage,
    pub retryable: bool,
    pub category: ErrorCategory,
    pub hint: RecoveryHint,
    pub message: String,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.code, self.message)
    }
}

/// Retry semantics of a code: `(retryable, category, hint)`.
fn semantics(code: ErrorCode) -> (bool, ErrorCategory, RecoveryHint) {
    use ErrorCategory::*;
    match code {
        ErrorCode::ProcessingTimeout | ErrorCode::RateLimited | ErrorCode::UpstreamUnavailable => {
            (true, Transient, RecoveryHint::BackOff)
        }
        ErrorCode::GpuOutOfMemory => (true, Transient, RecoveryHint::ReduceConcurrency),
        ErrorCode::BackpressureExceeded => (false, FlowControl, RecoveryHint::WaitForRecovery),
        ErrorCode::InvalidAudio
        | ErrorCode::UnsupportedLanguagePair
        | ErrorCode::SynthesisFailed
        | ErrorCode::DurationMismatchExceeded
        | ErrorCode::InvalidConfig
        | ErrorCode::StreamPaused
        | ErrorCode::SessionNotReady
        | ErrorCode::DuplicateSequence
        | ErrorCode::SequenceOutOfWindow
        | ErrorCode::StageUnavailable
        | ErrorCode::ProtocolError
        | ErrorCode::InternalError => (false, Permanent, RecoveryHint::Skip),
    }
}

/// Classifies a failure that occurred in `stage`.
///
/// Pure: the same `(stage, failure kind)` always yields the same
/// `(code, retryable)` pair.
pub fn classify(stage: Stage, failure: &StageFailure) -> ClassifiedError {
    let code = failure.code();
    let (retryable, category, hint) = semantics(code);
    ClassifiedError {
        code,
        stage,
        retryable,
        category,
        hint,
        message: failure.message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_rule_table() {
        let cases = vec![
            (
                Stage::Recognition,
                StageFailure::Timeout { after_ms: 5000 },
                ErrorCode::ProcessingTimeout,
                true,
            ),
            (
                Stage::Synthesis,
                StageFailure::Timeout { after_ms: 5000 },
                ErrorCode::ProcessingTimeout,
                true,
            ),
            (
                Stage::Translation,
                StageFailure::RateLimited {
                    message: msg("429"),
                },
                ErrorCode::RateLimited,
                true,
            ),
            (
                Stage::Translation,
                StageFailure::UpstreamUnavailable {
                    message: msg("503"),
                },
                ErrorCode::UpstreamUnavailable,
                true,
            ),
            (
                Stage::Recognition,
                StageFailure::GpuOutOfMemory {
                    message: msg("CUDA OOM"),
                },
                ErrorCode::GpuOutOfMemory,
                true,
            ),
            (
                Stage::Synthesis,
                StageFailure::GpuOutOfMemory {
                    message: msg("CUDA OOM"),
                },
                ErrorCode::GpuOutOfMemory,
                true,
            ),
            (
                Stage::Recognition,
                StageFailure::InvalidAudio {
                    message: msg("corrupt"),
                },
                ErrorCode::InvalidAudio,
                false,
            ),
            (
                Stage::Translation,
                StageFailure::UnsupportedLanguagePair {
                    source: msg("en"),
                    target: msg("xx"),
                },
                ErrorCode::UnsupportedLanguagePair,
                false,
            ),
            (
                Stage::Synthesis,
                StageFailure::SynthesisFailed {
                    message: msg("bad voice"),
                },
                ErrorCode::SynthesisFailed,
                false,
            ),
            (
                Stage::Synthesis,
                StageFailure::DurationMismatch { variance: 0.3 },
                ErrorCode::DurationMismatchExceeded,
                false,
            ),
            (
                Stage::Session,
                StageFailure::InvalidConfig {
                    message: msg("bad"),
                },
                ErrorCode::InvalidConfig,
                false,
            ),
            (
                Stage::Session,
                StageFailure::BackpressureExceeded { in_flight: 10 },
                ErrorCode::BackpressureExceeded,
                false,
            ),
            (
                Stage::Session,
                StageFailure::SequenceOutOfWindow {
                    sequence_number: 5_000_000,
                    next_expected: 0,
                },
                ErrorCode::SequenceOutOfWindow,
                false,
            ),
        ];

        for (stage, failure, code, retryable) in cases {
            let classified = classify(stage, &failure);
            assert_eq!(classified.code, code, "code for {:?}", failure);
            assert_eq!(classified.retryable, retryable, "retryable for {:?}", failure);
            assert_eq!(classified.stage, stage);
        }
    }

    #[test]
    fn test_classification_is_idempotent() {
        let failure = StageFailure::RateLimited {
            message: msg("slow down"),
        };
        let first = classify(Stage::Translation, &failure);
        let second = classify(Stage::Translation, &failure);
        assert_eq!(first, second);
    }

    #[test]
    fn test_backpressure_is_flow_control_not_failure() {
        let classified = classify(
            Stage::Session,
            &StageFailure::BackpressureExceeded { in_flight: 10 },
        );
        assert_eq!(classified.category, ErrorCategory::FlowControl);
        assert_eq!(classified.hint, RecoveryHint::WaitForRecovery);
    }

    #[test]
    fn test_gpu_oom_hints_reduce_concurrency() {
        let classified = classify(
            Stage::Synthesis,
            &StageFailure::GpuOutOfMemory {
                message: msg("out of memory"),
            },
        );
        assert_eq!(classified.category, ErrorCategory::Transient);
        assert_eq!(classified.hint, RecoveryHint::ReduceConcurrency);
    }

    #[test]
    fn test_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorCode::DurationMismatchExceeded).unwrap();
        assert_eq!(json, "\"duration_mismatch_exceeded\"");
        assert_eq!(ErrorCode::DurationMismatchExceeded.as_str(), "duration_mismatch_exceeded");
    }

    #[test]
    fn test_classified_error_display() {
        let classified = classify(Stage::Recognition, &StageFailure::Timeout { after_ms: 250 });
        assert_eq!(
            classified.to_string(),
            "[recognition] processing_timeout: stage did not finish within 250ms"
        );
    }
}
