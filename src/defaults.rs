//! Default configuration constants for dubline.
//!
//! Shared by the deployment config, session config, and the pipeline so that
//! every layer agrees on the same numbers.

/// Default audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Default channel count (mono).
pub const CHANNELS: u16 = 1;

/// Supported sample rate range for incoming fragments.
pub const MIN_SAMPLE_RATE: u32 = 8000;
pub const MAX_SAMPLE_RATE: u32 = 48000;

/// Maximum supported channel count.
pub const MAX_CHANNELS: u16 = 2;

/// Default expected fragment duration in milliseconds.
pub const EXPECTED_FRAGMENT_MS: u64 = 3000;

/// Default source and target languages.
pub const SOURCE_LANGUAGE: &str = "en";
pub const TARGET_LANGUAGE: &str = "es";

/// Default synthesis voice identifier.
pub const VOICE: &str = "default";

/// Default number of concurrent stage-execution slots per stream.
pub const MAX_INFLIGHT: usize = 3;

/// Hard bounds for `max_inflight`.
pub const MAX_INFLIGHT_LOWER: usize = 1;
pub const MAX_INFLIGHT_UPPER: usize = 10;

/// Default timeout for a single stage invocation.
///
/// Recognition, translation, and synthesis each get their own budget.
pub const STAGE_TIMEOUT_MS: u64 = 5000;

/// In-flight count at which severity becomes `medium` (caller should slow down).
pub const BACKPRESSURE_MEDIUM_AT: usize = 4;

/// In-flight count at which severity becomes `high` (caller should pause).
pub const BACKPRESSURE_HIGH_AT: usize = 7;

/// In-flight count above which new fragments are rejected outright.
pub const BACKPRESSURE_REJECT_ABOVE: usize = 10;

/// How far past the hard in-flight limit a sequence number may run ahead of
/// the next one due for delivery. Anything further is refused.
pub const SEQUENCE_WINDOW_MARGIN: usize = 10;

/// Duration variance (fraction) up to which a dub counts as a full success.
pub const DURATION_SUCCESS_MAX: f64 = 0.10;

/// Duration variance (fraction) up to which a dub counts as degraded but usable.
pub const DURATION_PARTIAL_MAX: f64 = 0.20;

/// Speed ratio band the time-stretch step is allowed to attempt.
pub const MIN_SPEED_RATIO: f64 = 0.8;
pub const MAX_SPEED_RATIO: f64 = 1.2;

/// Grace period before a completed session's connection is closed.
pub const COMPLETION_GRACE_MS: u64 = 500;

/// RMS energy (0.0 to 1.0) below which the loopback recognizer reports no speech.
pub const SPEECH_ENERGY_THRESHOLD: f32 = 0.01;

/// Socket file name used under `$XDG_RUNTIME_DIR`.
pub const SOCKET_NAME: &str = "dubline.sock";
