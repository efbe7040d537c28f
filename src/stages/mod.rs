//! Stage capabilities: recognition, translation, synthesis.
//!
//! The coordinator only sees these traits and the asset contract. Model
//! inference lives behind them and is shared across sessions through
//! [`StageSet`], so every implementation must be safe under concurrent calls.

pub mod mock;

use crate::pipeline::asset::{AssetId, AssetOrigin, AudioAsset, TranscriptAsset, TranslationAsset};
use crate::pipeline::error::Stage;
use crate::pipeline::types::AudioPayload;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use mock::{MockRecognizer, MockSynthesizer, MockTranslator};

/// Input to the recognition stage.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub origin: AssetOrigin,
    pub audio: AudioPayload,
    pub language: String,
}

/// Input to the translation stage.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub origin: AssetOrigin,
    /// The transcript this translation derives from.
    pub parent: AssetId,
    pub text: String,
    pub source_language: String,
    pub target_language: String,
}

/// Input to the synthesis stage.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub origin: AssetOrigin,
    /// The translation this audio derives from.
    pub parent: AssetId,
    pub text: String,
    pub language: String,
    pub voice: String,
    /// Duration of the original fragment; synthesis should aim for it.
    pub target_duration_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Speech-to-text capability.
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize speech. Failures are reported as a failed asset, not an error.
    async fn recognize(&self, request: RecognitionRequest) -> TranscriptAsset;

    fn name(&self) -> &str;

    /// Whether the underlying model is loaded and usable.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Text translation capability.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: TranslationRequest) -> TranslationAsset;

    fn name(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }

    /// Whether the language pair can be translated.
    fn supports(&self, _source_language: &str, _target_language: &str) -> bool {
        true
    }
}

/// Text-to-speech capability.
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest) -> AudioAsset;

    fn name(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Names of the stage implementations, advertised in `stream:ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub recognizer: String,
    pub translator: String,
    pub synthesizer: String,
}

/// Shared handle to the three stage capabilities.
///
/// Built once by the composition root and cloned into every session.
#[derive(Clone)]
pub struct StageSet {
    pub recognizer: Arc<dyn Recognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl StageSet {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            recognizer,
            translator,
            synthesizer,
        }
    }

    /// Deterministic stand-ins for real models.
    ///
    /// Recognition detects speech by energy, translation tags the text with
    /// the target language, synthesis emits a tone of the requested length.
    pub fn loopback() -> Self {
        Self::new(
            Arc::new(MockRecognizer::loopback()),
            Arc::new(MockTranslator::loopback()),
            Arc::new(MockSynthesizer::loopback()),
        )
    }

    /// The first stage whose capability is not ready, if any.
    pub fn unavailable_stage(&self) -> Option<Stage> {
        if !self.recognizer.is_ready() {
            Some(Stage::Recognition)
        } else if !self.translator.is_ready() {
            Some(Stage::Translation)
        } else if !self.synthesizer.is_ready() {
            Some(Stage::Synthesis)
        } else {
            None
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            recognizer: self.recognizer.name().to_string(),
            translator: self.translator.name().to_string(),
            synthesizer: self.synthesizer.name().to_string(),
        }
    }
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSet")
            .field("recognizer", &self.recognizer.name())
            .field("translator", &self.translator.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish()
    }
}
