//! Data types flowing through the dubbing pipeline.

use crate::audio::pcm;
use crate::pipeline::asset::{AssetOrigin, LineageEntry, Status, Warning};
use crate::pipeline::duration::DurationMatch;
use crate::pipeline::error::{ClassifiedError, Stage, StageFailure, classify};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw PCM audio with its format.
///
/// `data` holds interleaved signed 16-bit little-endian samples. On the wire
/// it is base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPayload {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

impl AudioPayload {
    /// A zero-length payload (used by failed assets).
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            sample_rate: 0,
            channels: 0,
            duration_ms: 0,
        }
    }

    /// Builds a payload from samples, computing the duration.
    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        Self {
            data: pcm::samples_to_bytes(samples),
            sample_rate,
            channels,
            duration_ms: pcm::duration_ms(samples.len(), sample_rate, channels),
        }
    }

    /// Digital silence of the given duration.
    pub fn silence(sample_rate: u32, channels: u16, duration_ms: u64) -> Self {
        let samples = pcm::silence(sample_rate, channels, duration_ms);
        Self {
            data: pcm::samples_to_bytes(&samples),
            sample_rate,
            channels,
            duration_ms,
        }
    }

    /// Decodes the PCM16 samples.
    pub fn samples(&self) -> Vec<i16> {
        pcm::bytes_to_samples(&self.data)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checks that the payload is well-formed PCM16 in the expected format.
    pub fn validate(&self, sample_rate: u32, channels: u16) -> Result<(), String> {
        if self.sample_rate != sample_rate {
            return Err(format!(
                "sample rate {} does not match stream sample rate {}",
                self.sample_rate, sample_rate
            ));
        }
        if self.channels != channels {
            return Err(format!(
                "{} channels does not match stream channel count {}",
                self.channels, channels
            ));
        }
        let frame_bytes = 2 * channels as usize;
        if self.data.len() % frame_bytes != 0 {
            return Err(format!(
                "payload of {} bytes is not a whole number of {}-byte frames",
                self.data.len(),
                frame_bytes
            ));
        }
        Ok(())
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One unit of work submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: String,
    pub stream_id: String,
    /// Zero-based, unique and increasing within a stream.
    pub sequence_number: u64,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
    pub audio: AudioPayload,
}

impl Fragment {
    pub fn new(
        fragment_id: impl Into<String>,
        stream_id: impl Into<String>,
        sequence_number: u64,
        audio: AudioPayload,
    ) -> Self {
        Self {
            fragment_id: fragment_id.into(),
            stream_id: stream_id.into(),
            sequence_number,
            submitted_at: Utc::now(),
            audio,
        }
    }

    pub fn origin(&self) -> AssetOrigin {
        AssetOrigin {
            fragment_id: self.fragment_id.clone(),
            stream_id: self.stream_id.clone(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.audio.duration_ms
    }
}

/// Measured wall time per stage. `None` means the stage was not invoked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    /// Time spent waiting for a processing slot.
    pub queued_ms: u64,
    pub recognition_ms: Option<u64>,
    pub translation_ms: Option<u64>,
    pub synthesis_ms: Option<u64>,
}

impl StageTimings {
    pub fn get(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Recognition => self.recognition_ms,
            Stage::Translation => self.translation_ms,
            Stage::Synthesis => self.synthesis_ms,
            Stage::Session => None,
        }
    }

    pub fn record(&mut self, stage: Stage, elapsed_ms: u64) {
        match stage {
            Stage::Recognition => self.recognition_ms = Some(elapsed_ms),
            Stage::Translation => self.translation_ms = Some(elapsed_ms),
            Stage::Synthesis => self.synthesis_ms = Some(elapsed_ms),
            Stage::Session => {}
        }
    }
}

/// The unit delivered to the caller for every submitted fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentResult {
    pub fragment_id: String,
    pub stream_id: String,
    pub sequence_number: u64,
    pub submitted_at: DateTime<Utc>,
    pub status: Status,
    /// Dubbed audio; present exactly when status is success or partial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub processing_time_ms: u64,
    pub timings: StageTimings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_match: Option<DurationMatch>,
    #[serde(default)]
    pub lineage: Vec<LineageEntry>,
}

impl FragmentResult {
    fn skeleton(fragment: &Fragment, status: Status) -> Self {
        Self {
            fragment_id: fragment.fragment_id.clone(),
            stream_id: fragment.stream_id.clone(),
            sequence_number: fragment.sequence_number,
            submitted_at: fragment.submitted_at,
            status,
            audio: None,
            transcript: None,
            translated_text: None,
            processing_time_ms: 0,
            timings: StageTimings::default(),
            warning: None,
            error: None,
            duration_match: None,
            lineage: Vec::new(),
        }
    }

    /// A terminal failed result for a fragment that was never attempted
    /// (or whose processing could not produce anything).
    pub fn rejected(fragment: &Fragment, stage: Stage, failure: &StageFailure) -> Self {
        Self::failed(fragment, classify(stage, failure))
    }

    pub fn failed(fragment: &Fragment, error: ClassifiedError) -> Self {
        let mut result = Self::skeleton(fragment, Status::Failed);
        result.error = Some(error);
        result
    }

    /// A delivered dub (success or partial).
    pub fn dubbed(fragment: &Fragment, audio: AudioPayload, warning: Option<Warning>) -> Self {
        let status = if warning.is_some() {
            Status::Partial
        } else {
            Status::Success
        };
        let mut result = Self::skeleton(fragment, status);
        result.audio = Some(audio);
        result.warning = warning;
        result
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }

    /// `failed` carries an error and no audio; success/partial carry audio.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            Status::Failed => self.audio.is_none() && self.error.is_some(),
            Status::Success => self.audio.is_some() && self.error.is_none(),
            Status::Partial => {
                self.audio.is_some() && self.error.is_none() && self.warning.is_some()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorCode;

    fn fragment() -> Fragment {
        Fragment::new("f-7", "s-1", 7, AudioPayload::silence(16000, 1, 250))
    }

    #[test]
    fn test_silence_payload_has_expected_size() {
        let payload = AudioPayload::silence(16000, 1, 250);
        assert_eq!(payload.data.len(), 4000 * 2);
        assert_eq!(payload.duration_ms, 250);
        assert!(payload.samples().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_from_samples_computes_duration() {
        let payload = AudioPayload::from_samples(&[1i16; 32000], 16000, 2);
        assert_eq!(payload.duration_ms, 1000);
        assert_eq!(payload.samples().len(), 32000);
    }

    #[test]
    fn test_validate_rejects_mismatched_format() {
        let payload = AudioPayload::silence(16000, 1, 100);
        assert!(payload.validate(16000, 1).is_ok());
        assert!(payload.validate(48000, 1).is_err());
        assert!(payload.validate(16000, 2).is_err());

        let mut odd = payload.clone();
        odd.data.push(0);
        assert!(odd.validate(16000, 1).is_err());
    }

    #[test]
    fn test_audio_bytes_are_base64_on_the_wire() {
        let payload = AudioPayload {
            data: vec![1, 2, 3, 4],
            sample_rate: 16000,
            channels: 1,
            duration_ms: 0,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["data"], "AQIDBA==");

        let back: AudioPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_fragment_submitted_at_defaults_when_missing() {
        let json = r#"{
            "fragment_id": "a",
            "stream_id": "s",
            "sequence_number": 0,
            "audio": {"data": "", "sample_rate": 16000, "channels": 1, "duration_ms": 0}
        }"#;
        let fragment: Fragment = serde_json::from_str(json).unwrap();
        assert_eq!(fragment.sequence_number, 0);
        assert!(fragment.audio.is_empty());
    }

    #[test]
    fn test_rejected_result_is_consistent() {
        let result = FragmentResult::rejected(
            &fragment(),
            Stage::Session,
            &StageFailure::BackpressureExceeded { in_flight: 10 },
        );
        assert_eq!(result.sequence_number, 7);
        assert!(result.is_failed());
        assert!(result.audio.is_none());
        assert!(!result.is_retryable());
        assert_eq!(
            result.error.as_ref().map(|e| e.code),
            Some(ErrorCode::BackpressureExceeded)
        );
        assert!(result.is_consistent());
    }

    #[test]
    fn test_dubbed_result_status_follows_warning() {
        let audio = AudioPayload::silence(16000, 1, 100);
        let ok = FragmentResult::dubbed(&fragment(), audio.clone(), None);
        assert_eq!(ok.status, Status::Success);
        assert!(ok.is_consistent());

        let partial = FragmentResult::dubbed(
            &fragment(),
            audio,
            Some(Warning::duration_variance_high(0.15)),
        );
        assert_eq!(partial.status, Status::Partial);
        assert!(partial.is_consistent());
    }

    #[test]
    fn test_stage_timings_record() {
        let mut timings = StageTimings::default();
        timings.record(Stage::Translation, 42);
        assert_eq!(timings.get(Stage::Translation), Some(42));
        assert_eq!(timings.get(Stage::Recognition), None);
    }
}
