//! `stream:init` payload and its validation.

use crate::config::{self, Config};
use crate::defaults;
use crate::error::{DubError, Result};
use crate::pipeline::coordinator::{CoordinatorConfig, FallbackMode};
use crate::stages::StageSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session parameters as sent by the caller. Omitted fields take the
/// deployment defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_fragment_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inflight: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackMode>,
}

impl StreamConfig {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            ..Default::default()
        }
    }

    /// Fills omitted fields from the deployment configuration.
    pub fn resolve(self, config: &Config) -> SessionConfig {
        let session = &config.session;
        SessionConfig {
            stream_id: self.stream_id,
            source_language: self
                .source_language
                .unwrap_or_else(|| session.source_language.clone()),
            target_language: self
                .target_language
                .unwrap_or_else(|| session.target_language.clone()),
            voice: self.voice.unwrap_or_else(|| session.voice.clone()),
            sample_rate: self.sample_rate.unwrap_or(session.sample_rate),
            channels: self.channels.unwrap_or(session.channels),
            expected_fragment_ms: self
                .expected_fragment_ms
                .unwrap_or(session.expected_fragment_ms),
            max_inflight: self.max_inflight.unwrap_or(config.pipeline.max_inflight),
            fallback: self.fallback.unwrap_or(config.pipeline.fallback),
        }
    }
}

/// Fully resolved session parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub stream_id: String,
    pub source_language: String,
    pub target_language: String,
    pub voice: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub expected_fragment_ms: u64,
    pub max_inflight: usize,
    pub fallback: FallbackMode,
}

impl SessionConfig {
    /// Checks the parameters and that the stages can serve them.
    pub fn validate(&self, stages: &StageSet) -> Result<()> {
        if self.stream_id.trim().is_empty() {
            return Err(invalid("stream_id must not be empty"));
        }
        if self.source_language.trim().is_empty() || self.target_language.trim().is_empty() {
            return Err(invalid("source and target language must not be empty"));
        }
        if self.source_language == self.target_language {
            return Err(invalid(format!(
                "source and target language are both '{}'",
                self.source_language
            )));
        }
        if !(defaults::MIN_SAMPLE_RATE..=defaults::MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(invalid(format!(
                "sample_rate {} is outside {}..={}",
                self.sample_rate,
                defaults::MIN_SAMPLE_RATE,
                defaults::MAX_SAMPLE_RATE
            )));
        }
        if !(1..=defaults::MAX_CHANNELS).contains(&self.channels) {
            return Err(invalid(format!(
                "channels {} is outside 1..={}",
                self.channels,
                defaults::MAX_CHANNELS
            )));
        }
        if self.expected_fragment_ms == 0 {
            return Err(invalid("expected_fragment_ms must be greater than 0"));
        }
        config::validate_max_inflight(self.max_inflight)
            .map_err(|e| invalid(e.to_string()))?;

        if let Some(stage) = stages.unavailable_stage() {
            return Err(DubError::StageUnavailable {
                stage: stage.to_string(),
            });
        }
        if !stages
            .translator
            .supports(&self.source_language, &self.target_language)
        {
            return Err(DubError::UnsupportedLanguagePair {
                source_language: self.source_language.clone(),
                target_language: self.target_language.clone(),
            });
        }
        Ok(())
    }

    /// Coordinator settings for this session.
    pub fn coordinator_config(&self, config: &Config) -> CoordinatorConfig {
        CoordinatorConfig {
            source_language: self.source_language.clone(),
            target_language: self.target_language.clone(),
            voice: self.voice.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            max_inflight: self.max_inflight,
            stage_timeout: Duration::from_millis(config.pipeline.stage_timeout_ms),
            fallback: self.fallback,
            time_stretch: config.pipeline.time_stretch,
            duration: config.duration,
            backpressure: config.backpressure,
        }
    }
}

fn invalid(message: impl Into<String>) -> DubError {
    DubError::InvalidStreamConfig {
        message: message.into(),
    }
}
