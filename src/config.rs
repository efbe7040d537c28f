use crate::defaults;
use crate::error::{DubError, Result};
use crate::pipeline::backpressure::BackpressureThresholds;
use crate::pipeline::coordinator::FallbackMode;
use crate::pipeline::duration::DurationPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub backpressure: BackpressureThresholds,
    pub duration: DurationPolicy,
    pub session: SessionDefaults,
}

/// Socket server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket path; `None` uses the runtime directory.
    pub socket: Option<PathBuf>,
    /// Delay between `stream:complete` and closing the connection.
    pub completion_grace_ms: u64,
}

/// Per-stream processing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_inflight: usize,
    pub stage_timeout_ms: u64,
    pub fallback: FallbackMode,
    pub time_stretch: bool,
}

/// Defaults for `stream:init` fields the caller leaves out
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionDefaults {
    pub source_language: String,
    pub target_language: String,
    pub voice: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub expected_fragment_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            completion_grace_ms: defaults::COMPLETION_GRACE_MS,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_inflight: defaults::MAX_INFLIGHT,
            stage_timeout_ms: defaults::STAGE_TIMEOUT_MS,
            fallback: FallbackMode::default(),
            time_stretch: false,
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            source_language: defaults::SOURCE_LANGUAGE.to_string(),
            target_language: defaults::TARGET_LANGUAGE.to_string(),
            voice: defaults::VOICE.to_string(),
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            expected_fragment_ms: defaults::EXPECTED_FRAGMENT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - DUBLINE_SOCKET → server.socket
    /// - DUBLINE_MAX_INFLIGHT → pipeline.max_inflight
    /// - DUBLINE_STAGE_TIMEOUT_MS → pipeline.stage_timeout_ms
    /// - DUBLINE_FALLBACK → pipeline.fallback
    ///
    /// Empty or unparsable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(socket) = std::env::var("DUBLINE_SOCKET")
            && !socket.is_empty()
        {
            self.server.socket = Some(PathBuf::from(socket));
        }

        if let Ok(value) = std::env::var("DUBLINE_MAX_INFLIGHT")
            && let Ok(max_inflight) = value.parse()
        {
            self.pipeline.max_inflight = max_inflight;
        }

        if let Ok(value) = std::env::var("DUBLINE_STAGE_TIMEOUT_MS")
            && let Ok(timeout_ms) = value.parse()
        {
            self.pipeline.stage_timeout_ms = timeout_ms;
        }

        if let Ok(value) = std::env::var("DUBLINE_FALLBACK")
            && let Ok(fallback) = value.parse()
        {
            self.pipeline.fallback = fallback;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_max_inflight(self.pipeline.max_inflight)?;

        if self.pipeline.stage_timeout_ms == 0 {
            return Err(invalid("pipeline.stage_timeout_ms", "must be greater than 0"));
        }

        self.backpressure
            .validate()
            .map_err(|message| invalid("backpressure", &message))?;

        let d = &self.duration;
        if !(d.success_max > 0.0 && d.success_max <= d.partial_max) {
            return Err(invalid(
                "duration",
                &format!(
                    "expected 0 < success_max ({}) <= partial_max ({})",
                    d.success_max, d.partial_max
                ),
            ));
        }
        if !(d.min_speed_ratio > 0.0 && d.min_speed_ratio <= 1.0 && d.max_speed_ratio >= 1.0) {
            return Err(invalid(
                "duration",
                &format!(
                    "expected 0 < min_speed_ratio ({}) <= 1 <= max_speed_ratio ({})",
                    d.min_speed_ratio, d.max_speed_ratio
                ),
            ));
        }

        Ok(())
    }

    /// Socket path from config, or the per-user runtime default.
    pub fn socket_path(&self) -> PathBuf {
        self.server
            .socket
            .clone()
            .unwrap_or_else(crate::ipc::server::IpcServer::default_socket_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/dubline/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dubline")
            .join("config.toml")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DubError::ConfigParse {
            message: e.to_string(),
        })
    }
}

/// `max_inflight` must stay within 1..=10.
pub fn validate_max_inflight(max_inflight: usize) -> Result<()> {
    if !(defaults::MAX_INFLIGHT_LOWER..=defaults::MAX_INFLIGHT_UPPER).contains(&max_inflight) {
        return Err(invalid(
            "max_inflight",
            &format!(
                "{} is outside {}..={}",
                max_inflight,
                defaults::MAX_INFLIGHT_LOWER,
                defaults::MAX_INFLIGHT_UPPER
            ),
        ));
    }
    Ok(())
}

fn invalid(key: &str, message: &str) -> DubError {
    DubError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
