//! Per-stream dubbing pipeline.
//!
//! Each accepted fragment runs recognition, translation and synthesis as its
//! own task. The coordinator bounds how many run at once, tracks in-flight
//! work for backpressure, and releases results through the ordering queue so
//! they reach the caller in submission order.

pub mod asset;
pub mod backpressure;
pub mod coordinator;
pub mod duration;
pub mod error;
pub mod latency;
pub mod ordering;
pub mod types;

pub use asset::{Asset, AssetStatus, AudioAsset, Status, TranscriptAsset, TranslationAsset};
pub use backpressure::{BackpressureState, BackpressureTracker, FlowAction, Severity};
pub use coordinator::{
    Admission, CoordinatorConfig, FallbackMode, PipelineCoordinator, PipelineEvent,
};
pub use duration::{DurationMatch, DurationPolicy};
pub use error::{ClassifiedError, ErrorCategory, ErrorCode, Stage, StageFailure, classify};
pub use latency::{LatencyStats, LatencyTracker};
pub use ordering::OrderingQueue;
pub use types::{AudioPayload, Fragment, FragmentResult, StageTimings};
