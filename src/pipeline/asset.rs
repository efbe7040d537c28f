//! Typed, immutable stage outputs with status and lineage.
//!
//! Each stage produces exactly one asset per fragment. Assets form a linear
//! chain `Fragment → Transcript → Translation → Audio`: the transcript has no
//! parents, every later asset names exactly one parent.
//!
//! Status is a sum type so that "failed if and only if an error is present"
//! and "partial always carries a warning" hold by construction.

use crate::pipeline::duration::DurationMatch;
use crate::pipeline::error::{ClassifiedError, Stage, StageFailure, classify};
use crate::pipeline::types::AudioPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique asset identifier.
pub type AssetId = Uuid;

/// Overall status of an asset or fragment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Partial,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Partial => "partial",
            Status::Failed => "failed",
        }
    }
}

/// Non-fatal warning codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    DurationVarianceHigh,
}

/// Non-fatal warning attached to a partial asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_percent: Option<f64>,
}

impl Warning {
    pub fn duration_variance_high(variance: f64) -> Self {
        let percent = variance * 100.0;
        Self {
            code: WarningCode::DurationVarianceHigh,
            message: format!("dubbed duration differs from original by {percent:.1}%"),
            variance_percent: Some(percent),
        }
    }
}

/// Tri-state asset status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetStatus {
    Success,
    Partial { warning: Warning },
    Failed { error: ClassifiedError },
}

impl AssetStatus {
    pub fn kind(&self) -> Status {
        match self {
            AssetStatus::Success => Status::Success,
            AssetStatus::Partial { .. } => Status::Partial,
            AssetStatus::Failed { .. } => Status::Failed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AssetStatus::Failed { .. })
    }

    pub fn error(&self) -> Option<&ClassifiedError> {
        match self {
            AssetStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn warning(&self) -> Option<&Warning> {
        match self {
            AssetStatus::Partial { warning } => Some(warning),
            _ => None,
        }
    }

    fn failed(stage: Stage, failure: &StageFailure) -> Self {
        AssetStatus::Failed {
            error: classify(stage, failure),
        }
    }
}

/// Identity of the fragment an asset belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOrigin {
    pub fragment_id: String,
    pub stream_id: String,
}

/// Fields shared by every asset kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub asset_id: AssetId,
    pub fragment_id: String,
    pub stream_id: String,
    pub parent_asset_ids: Vec<AssetId>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: AssetStatus,
}

impl AssetMeta {
    fn new(origin: &AssetOrigin, parent: Option<AssetId>, status: AssetStatus) -> Self {
        Self {
            asset_id: Uuid::new_v4(),
            fragment_id: origin.fragment_id.clone(),
            stream_id: origin.stream_id.clone(),
            parent_asset_ids: parent.into_iter().collect(),
            latency_ms: 0,
            created_at: Utc::now(),
            status,
        }
    }
}

/// Which stage produced an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Transcript,
    Translation,
    Audio,
}

/// One link of a lineage chain, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub asset_id: AssetId,
    pub kind: AssetKind,
    pub parent_asset_ids: Vec<AssetId>,
    pub status: Status,
}

/// Common contract of all asset kinds.
pub trait AssetRecord {
    fn meta(&self) -> &AssetMeta;
    fn meta_mut(&mut self) -> &mut AssetMeta;
    fn kind(&self) -> AssetKind;

    fn asset_id(&self) -> AssetId {
        self.meta().asset_id
    }

    fn status(&self) -> &AssetStatus {
        &self.meta().status
    }

    fn is_failed(&self) -> bool {
        self.meta().status.is_failed()
    }

    fn lineage_entry(&self) -> LineageEntry {
        let meta = self.meta();
        LineageEntry {
            asset_id: meta.asset_id,
            kind: self.kind(),
            parent_asset_ids: meta.parent_asset_ids.clone(),
            status: meta.status.kind(),
        }
    }
}

/// A timed span of recognized text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Output of the recognition stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptAsset {
    #[serde(flatten)]
    pub meta: AssetMeta,
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub confidence: f32,
    pub language: String,
}

impl TranscriptAsset {
    pub fn success(
        origin: &AssetOrigin,
        text: impl Into<String>,
        segments: Vec<TranscriptSegment>,
        confidence: f32,
        language: impl Into<String>,
    ) -> Self {
        Self {
            meta: AssetMeta::new(origin, None, AssetStatus::Success),
            text: text.into(),
            segments,
            confidence,
            language: language.into(),
        }
    }

    pub fn failed(origin: &AssetOrigin, failure: &StageFailure) -> Self {
        Self {
            meta: AssetMeta::new(origin, None, AssetStatus::failed(Stage::Recognition, failure)),
            text: String::new(),
            segments: Vec::new(),
            confidence: 0.0,
            language: String::new(),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.meta.latency_ms = latency_ms;
        self
    }

    /// No speech was recognized.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Output of the translation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationAsset {
    #[serde(flatten)]
    pub meta: AssetMeta,
    pub text: String,
    pub source_text: String,
    pub source_language: String,
    pub target_language: String,
}

impl TranslationAsset {
    pub fn success(
        origin: &AssetOrigin,
        parent: AssetId,
        text: impl Into<String>,
        source_text: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            meta: AssetMeta::new(origin, Some(parent), AssetStatus::Success),
            text: text.into(),
            source_text: source_text.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
        }
    }

    pub fn failed(origin: &AssetOrigin, parent: AssetId, failure: &StageFailure) -> Self {
        Self {
            meta: AssetMeta::new(
                origin,
                Some(parent),
                AssetStatus::failed(Stage::Translation, failure),
            ),
            text: String::new(),
            source_text: String::new(),
            source_language: String::new(),
            target_language: String::new(),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.meta.latency_ms = latency_ms;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Output of the synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAsset {
    #[serde(flatten)]
    pub meta: AssetMeta,
    pub audio: AudioPayload,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_match: Option<DurationMatch>,
}

impl AudioAsset {
    pub fn success(
        origin: &AssetOrigin,
        parent: AssetId,
        audio: AudioPayload,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            meta: AssetMeta::new(origin, Some(parent), AssetStatus::Success),
            audio,
            voice: voice.into(),
            duration_match: None,
        }
    }

    pub fn failed(origin: &AssetOrigin, parent: AssetId, failure: &StageFailure) -> Self {
        Self {
            meta: AssetMeta::new(
                origin,
                Some(parent),
                AssetStatus::failed(Stage::Synthesis, failure),
            ),
            audio: AudioPayload::empty(),
            voice: String::new(),
            duration_match: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.meta.latency_ms = latency_ms;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.audio.duration_ms
    }

    /// Applies a duration grade to a successful synthesis.
    ///
    /// Already-failed assets keep their original error.
    pub fn grade(&mut self, duration_match: DurationMatch, status: AssetStatus) {
        if !self.meta.status.is_failed() {
            self.meta.status = status;
        }
        self.duration_match = Some(duration_match);
    }
}

macro_rules! impl_asset_record {
    ($ty:ty, $kind:expr) => {
        impl AssetRecord for $ty {
            fn meta(&self) -> &AssetMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut AssetMeta {
                &mut self.meta
            }

            fn kind(&self) -> AssetKind {
                $kind
            }
        }
    };
}

impl_asset_record!(TranscriptAsset, AssetKind::Transcript);
impl_asset_record!(TranslationAsset, AssetKind::Translation);
impl_asset_record!(AudioAsset, AssetKind::Audio);

/// Any asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
    Transcript(TranscriptAsset),
    Translation(TranslationAsset),
    Audio(AudioAsset),
}

impl AssetRecord for Asset {
    fn meta(&self) -> &AssetMeta {
        match self {
            Asset::Transcript(a) => &a.meta,
            Asset::Translation(a) => &a.meta,
            Asset::Audio(a) => &a.meta,
        }
    }

    fn meta_mut(&mut self) -> &mut AssetMeta {
        match self {
            Asset::Transcript(a) => &mut a.meta,
            Asset::Translation(a) => &mut a.meta,
            Asset::Audio(a) => &mut a.meta,
        }
    }

    fn kind(&self) -> AssetKind {
        match self {
            Asset::Transcript(_) => AssetKind::Transcript,
            Asset::Translation(_) => AssetKind::Translation,
            Asset::Audio(_) => AssetKind::Audio,
        }
    }
}
