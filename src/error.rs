//! Error types for dubline.
//!
//! These cover failures of the service itself (configuration, I/O, transport,
//! session misuse). Per-fragment processing failures are not errors in this
//! sense: they travel as values inside assets and fragment results, see
//! [`crate::pipeline::error`].

use crate::pipeline::error::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DubError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Session errors
    #[error("Invalid stream configuration: {message}")]
    InvalidStreamConfig { message: String },

    #[error("Unsupported language pair: {source_language} -> {target_language}")]
    UnsupportedLanguagePair {
        source_language: String,
        target_language: String,
    },

    #[error("Stage capability unavailable: {stage}")]
    StageUnavailable { stage: String },

    #[error("Invalid session transition from {from} on {request}")]
    InvalidTransition { from: String, request: String },

    // Audio errors
    #[error("Audio format error: {message}")]
    AudioFormat { message: String },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl DubError {
    /// Code reported in a session-level `error` event.
    pub fn code(&self) -> ErrorCode {
        match self {
            DubError::ConfigFileNotFound { .. }
            | DubError::ConfigParse { .. }
            | DubError::ConfigInvalidValue { .. }
            | DubError::Config(_)
            | DubError::InvalidStreamConfig { .. } => ErrorCode::InvalidConfig,
            DubError::UnsupportedLanguagePair { .. } => ErrorCode::UnsupportedLanguagePair,
            DubError::StageUnavailable { .. } => ErrorCode::StageUnavailable,
            DubError::InvalidTransition { .. } => ErrorCode::SessionNotReady,
            DubError::AudioFormat { .. } | DubError::Wav(_) => ErrorCode::InvalidAudio,
            DubError::IpcProtocol { .. } | DubError::Json(_) => ErrorCode::ProtocolError,
            DubError::IpcSocket { .. }
            | DubError::IpcConnection { .. }
            | DubError::Io(_)
            | DubError::Other(_) => ErrorCode::InternalError,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, DubError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = DubError::ConfigInvalidValue {
            key: "pipeline.max_inflight".to_string(),
            message: "must be between 1 and 10".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for pipeline.max_inflight: must be between 1 and 10"
        );
    }

    #[test]
    fn test_invalid_stream_config_display() {
        let error = DubError::InvalidStreamConfig {
            message: "stream_id must not be empty".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid stream configuration: stream_id must not be empty"
        );
    }

    #[test]
    fn test_unsupported_language_pair_display() {
        let error = DubError::UnsupportedLanguagePair {
            source_language: "en".to_string(),
            target_language: "tlh".to_string(),
        };
        assert_eq!(error.to_string(), "Unsupported language pair: en -> tlh");
    }

    #[test]
    fn test_invalid_transition_display() {
        let error = DubError::InvalidTransition {
            from: "completed".to_string(),
            request: "resume".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid session transition from completed on resume"
        );
    }

    #[test]
    fn test_ipc_protocol_display() {
        let error = DubError::IpcProtocol {
            message: "unknown event".to_string(),
        };
        assert_eq!(error.to_string(), "IPC protocol error: unknown event");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "socket missing");
        let error: DubError = io_error.into();
        assert!(error.to_string().contains("socket missing"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: DubError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: DubError = json_error.into();
        assert!(error.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: DubError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_codes_for_session_failures() {
        let invalid = DubError::InvalidStreamConfig {
            message: "bad".to_string(),
        };
        assert_eq!(invalid.code(), ErrorCode::InvalidConfig);

        let unavailable = DubError::StageUnavailable {
            stage: "recognition".to_string(),
        };
        assert_eq!(unavailable.code(), ErrorCode::StageUnavailable);

        let protocol = DubError::IpcProtocol {
            message: "garbage".to_string(),
        };
        assert_eq!(protocol.code(), ErrorCode::ProtocolError);
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<DubError>();
        assert_sync::<DubError>();
    }
}
