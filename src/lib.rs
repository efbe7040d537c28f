//! dubline - real-time speech dubbing pipeline coordinator
//!
//! Turns a stream of audio fragments into a stream of dubbed fragments:
//! recognition, translation and synthesis run concurrently per fragment,
//! results are delivered in submission order, in-flight work is bounded with
//! a backpressure signal back to the caller, and every failure is classified
//! for caller-side retry.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod pipeline;
pub mod session;
pub mod stages;

// Capabilities
pub use stages::{Recognizer, StageSet, Synthesizer, Translator};

// Pipeline
pub use pipeline::coordinator::{
    Admission, CoordinatorConfig, FallbackMode, PipelineCoordinator, PipelineEvent,
};
pub use pipeline::types::{AudioPayload, Fragment, FragmentResult};

// Sessions
pub use session::{SessionState, SessionSummary, StreamConfig, StreamSession};

// Error handling
pub use error::{DubError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_appends_git_hash_when_present() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => assert_eq!(ver.split('+').nth(1), Some(hash)),
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
