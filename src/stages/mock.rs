//! Scriptable stage capabilities.
//!
//! Used by tests to inject delays, failures and panics per fragment, and by
//! `dubline serve` as loopback stand-ins for real models.

use crate::audio::pcm;
use crate::defaults;
use crate::pipeline::asset::{AudioAsset, TranscriptAsset, TranscriptSegment, TranslationAsset};
use crate::pipeline::error::StageFailure;
use crate::pipeline::types::AudioPayload;
use crate::stages::{
    RecognitionRequest, Recognizer, SynthesisRequest, Synthesizer, TranslationRequest, Translator,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Behavior shared by all mock stages.
#[derive(Debug, Clone)]
struct Script {
    name: String,
    delay: Duration,
    delays: HashMap<String, Duration>,
    failure: Option<StageFailure>,
    failures: HashMap<String, StageFailure>,
    panics: bool,
    ready: bool,
    calls: Arc<AtomicUsize>,
}

impl Script {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            failure: None,
            failures: HashMap::new(),
            panics: false,
            ready: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counts the call, waits the scripted delay, and returns the scripted
    /// failure for this fragment, if any.
    async fn run(&self, fragment_id: &str) -> Option<StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delays.get(fragment_id).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.panics {
            panic!("{} panicked on fragment {}", self.name, fragment_id);
        }

        self.failures
            .get(fragment_id)
            .cloned()
            .or_else(|| self.failure.clone())
    }
}

macro_rules! scripted_builders {
    ($ty:ty) => {
        impl $ty {
            /// Delay every call by `delay`.
            pub fn with_delay(mut self, delay: Duration) -> Self {
                self.script.delay = delay;
                self
            }

            /// Delay calls for one fragment.
            pub fn with_delay_for(mut self, fragment_id: &str, delay: Duration) -> Self {
                self.script.delays.insert(fragment_id.to_string(), delay);
                self
            }

            /// Fail every call.
            pub fn with_failure(mut self, failure: StageFailure) -> Self {
                self.script.failure = Some(failure);
                self
            }

            /// Fail calls for one fragment.
            pub fn with_failure_for(mut self, fragment_id: &str, failure: StageFailure) -> Self {
                self.script.failures.insert(fragment_id.to_string(), failure);
                self
            }

            /// Panic inside every call.
            pub fn with_panic(mut self) -> Self {
                self.script.panics = true;
                self
            }

            /// Report the model as not loaded.
            pub fn unavailable(mut self) -> Self {
                self.script.ready = false;
                self
            }

            /// Number of times the stage was invoked.
            pub fn calls(&self) -> usize {
                self.script.calls.load(Ordering::SeqCst)
            }

            /// Shared call counter, readable after the mock is moved into a
            /// [`StageSet`](crate::stages::StageSet).
            pub fn call_counter(&self) -> Arc<AtomicUsize> {
                Arc::clone(&self.script.calls)
            }
        }
    };
}

/// What the mock recognizer hears.
#[derive(Debug, Clone)]
enum Hearing {
    /// Always the same text.
    Fixed(String),
    /// Speech when RMS energy reaches the threshold, silence otherwise.
    Energy(f32),
}

/// Mock speech recognizer.
#[derive(Debug, Clone)]
pub struct MockRecognizer {
    script: Script,
    hearing: Hearing,
    language: String,
}

impl MockRecognizer {
    /// Recognizes "mock transcription" for every fragment.
    pub fn new(name: &str) -> Self {
        Self {
            script: Script::new(name),
            hearing: Hearing::Fixed("mock transcription".to_string()),
            language: defaults::SOURCE_LANGUAGE.to_string(),
        }
    }

    /// Energy-based speech detection.
    pub fn loopback() -> Self {
        Self::new("loopback-recognizer").with_energy_threshold(defaults::SPEECH_ENERGY_THRESHOLD)
    }

    pub fn with_response(mut self, text: &str) -> Self {
        self.hearing = Hearing::Fixed(text.to_string());
        self
    }

    /// Recognize nothing (silence).
    pub fn with_silence(self) -> Self {
        self.with_response("")
    }

    pub fn with_energy_threshold(mut self, threshold: f32) -> Self {
        self.hearing = Hearing::Energy(threshold);
        self
    }

    fn hear(&self, audio: &AudioPayload) -> String {
        match &self.hearing {
            Hearing::Fixed(text) => text.clone(),
            Hearing::Energy(threshold) => {
                let energy = pcm::rms(&audio.samples());
                if energy >= *threshold {
                    format!("speech {}ms", audio.duration_ms)
                } else {
                    String::new()
                }
            }
        }
    }
}

scripted_builders!(MockRecognizer);

#[async_trait::async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(&self, request: RecognitionRequest) -> TranscriptAsset {
        if let Some(failure) = self.script.run(&request.origin.fragment_id).await {
            return TranscriptAsset::failed(&request.origin, &failure);
        }

        let text = self.hear(&request.audio);
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![TranscriptSegment {
                start_ms: 0,
                end_ms: request.audio.duration_ms,
                text: text.clone(),
            }]
        };
        let language = if request.language.is_empty() {
            self.language.clone()
        } else {
            request.language
        };
        TranscriptAsset::success(&request.origin, text, segments, 0.9, language)
    }

    fn name(&self) -> &str {
        &self.script.name
    }

    fn is_ready(&self) -> bool {
        self.script.ready
    }
}

/// Mock translator.
#[derive(Debug, Clone)]
pub struct MockTranslator {
    script: Script,
    response: Option<String>,
    supported: Option<Vec<(String, String)>>,
}

impl MockTranslator {
    /// Prefixes the text with the target language, e.g. `[es] hello`.
    pub fn new(name: &str) -> Self {
        Self {
            script: Script::new(name),
            response: None,
            supported: None,
        }
    }

    pub fn loopback() -> Self {
        Self::new("loopback-translator")
    }

    pub fn with_response(mut self, text: &str) -> Self {
        self.response = Some(text.to_string());
        self
    }

    /// Restrict support to the listed `(source, target)` pairs.
    pub fn with_supported_pairs(mut self, pairs: &[(&str, &str)]) -> Self {
        self.supported = Some(
            pairs
                .iter()
                .map(|(s, t)| (s.to_string(), t.to_string()))
                .collect(),
        );
        self
    }
}

scripted_builders!(MockTranslator);

#[async_trait::async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, request: TranslationRequest) -> TranslationAsset {
        if let Some(failure) = self.script.run(&request.origin.fragment_id).await {
            return TranslationAsset::failed(&request.origin, request.parent, &failure);
        }
        if !self.supports(&request.source_language, &request.target_language) {
            let failure = StageFailure::UnsupportedLanguagePair {
                source: request.source_language,
                target: request.target_language,
            };
            return TranslationAsset::failed(&request.origin, request.parent, &failure);
        }

        let text = match &self.response {
            Some(text) => text.clone(),
            None if request.text.trim().is_empty() => String::new(),
            None => format!("[{}] {}", request.target_language, request.text),
        };
        TranslationAsset::success(
            &request.origin,
            request.parent,
            text,
            request.text,
            request.source_language,
            request.target_language,
        )
    }

    fn name(&self) -> &str {
        &self.script.name
    }

    fn is_ready(&self) -> bool {
        self.script.ready
    }

    fn supports(&self, source_language: &str, target_language: &str) -> bool {
        match &self.supported {
            Some(pairs) => pairs
                .iter()
                .any(|(s, t)| s == source_language && t == target_language),
            None => true,
        }
    }
}

/// Mock speech synthesizer producing a sine tone.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    script: Script,
    duration_ratio: f64,
    fixed_duration_ms: Option<u64>,
}

impl MockSynthesizer {
    /// Emits exactly the requested duration.
    pub fn new(name: &str) -> Self {
        Self {
            script: Script::new(name),
            duration_ratio: 1.0,
            fixed_duration_ms: None,
        }
    }

    pub fn loopback() -> Self {
        Self::new("loopback-synthesizer")
    }

    /// Produce `target * ratio` milliseconds of audio.
    pub fn with_duration_ratio(mut self, ratio: f64) -> Self {
        self.duration_ratio = ratio;
        self
    }

    /// Produce exactly `duration_ms`, regardless of the target.
    pub fn with_fixed_duration(mut self, duration_ms: u64) -> Self {
        self.fixed_duration_ms = Some(duration_ms);
        self
    }

    fn output_duration_ms(&self, target_ms: u64) -> u64 {
        self.fixed_duration_ms
            .unwrap_or_else(|| (target_ms as f64 * self.duration_ratio).round() as u64)
    }
}

scripted_builders!(MockSynthesizer);

#[async_trait::async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> AudioAsset {
        if let Some(failure) = self.script.run(&request.origin.fragment_id).await {
            return AudioAsset::failed(&request.origin, request.parent, &failure);
        }

        let duration_ms = self.output_duration_ms(request.target_duration_ms);
        let samples = pcm::tone(
            request.sample_rate,
            request.channels,
            duration_ms,
            440.0,
            0.3,
        );
        let audio = AudioPayload {
            data: pcm::samples_to_bytes(&samples),
            sample_rate: request.sample_rate,
            channels: request.channels,
            duration_ms,
        };
        AudioAsset::success(&request.origin, request.parent, audio, request.voice)
    }

    fn name(&self) -> &str {
        &self.script.name
    }

    fn is_ready(&self) -> bool {
        self.script.ready
    }
}
