//! Pipeline coordinator: admission, per-fragment stage execution, ordered delivery.
//!
//! ```text
//!  admit ──► [slot semaphore] ──► recognize ──► translate ──► synthesize ──► grade
//!    │                                                                        │
//!    └─ rejection (bypasses queue)              ordering queue ◄──────────────┘
//!                                                     │
//!                                               PipelineEvent::Processed
//! ```
//!
//! Each accepted fragment runs on its own task. Stage work runs on a nested
//! task so that a panicking capability still yields a terminal result for its
//! sequence number. The backpressure tracker, the ordering queue and the
//! statistics live behind one per-stream mutex; no state is shared across
//! streams apart from the stage capabilities.

use crate::audio::pcm;
use crate::defaults;
use crate::pipeline::asset::{
    AssetId, AssetMeta, AssetOrigin, AssetRecord, AssetStatus, AudioAsset, TranscriptAsset,
    TranslationAsset,
};
use crate::pipeline::backpressure::{BackpressureState, BackpressureThresholds, BackpressureTracker};
use crate::pipeline::duration::{DurationEvaluation, DurationGrade, DurationPolicy};
use crate::pipeline::error::{ClassifiedError, Stage, StageFailure, classify};
use crate::pipeline::ordering::OrderingQueue;
use crate::pipeline::types::{AudioPayload, Fragment, FragmentResult, StageTimings};
use crate::session::stats::{SessionStats, SessionSummary};
use crate::stages::{RecognitionRequest, StageSet, SynthesisRequest, TranslationRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Audio delivered for fragments with nothing to dub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Silence of the original fragment duration.
    #[default]
    Silence,
    /// The original fragment audio, unchanged.
    PassThroughOriginal,
}

impl FallbackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackMode::Silence => "silence",
            FallbackMode::PassThroughOriginal => "pass_through_original",
        }
    }

    fn audio(&self, fragment: &Fragment) -> AudioPayload {
        match self {
            FallbackMode::Silence => AudioPayload::silence(
                fragment.audio.sample_rate,
                fragment.audio.channels,
                fragment.duration_ms(),
            ),
            FallbackMode::PassThroughOriginal => fragment.audio.clone(),
        }
    }
}

impl FromStr for FallbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "silence" => Ok(FallbackMode::Silence),
            "pass_through_original" => Ok(FallbackMode::PassThroughOriginal),
            other => Err(format!(
                "unknown fallback mode '{}', expected 'silence' or 'pass_through_original'",
                other
            )),
        }
    }
}

/// Per-stream pipeline settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub source_language: String,
    pub target_language: String,
    pub voice: String,
    /// Audio format every fragment must match.
    pub sample_rate: u32,
    pub channels: u16,
    /// Concurrent stage-execution slots.
    pub max_inflight: usize,
    pub stage_timeout: Duration,
    pub fallback: FallbackMode,
    pub time_stretch: bool,
    pub duration: DurationPolicy,
    pub backpressure: BackpressureThresholds,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            source_language: defaults::SOURCE_LANGUAGE.to_string(),
            target_language: defaults::TARGET_LANGUAGE.to_string(),
            voice: defaults::VOICE.to_string(),
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            max_inflight: defaults::MAX_INFLIGHT,
            stage_timeout: Duration::from_millis(defaults::STAGE_TIMEOUT_MS),
            fallback: FallbackMode::default(),
            time_stretch: false,
            duration: DurationPolicy::default(),
            backpressure: BackpressureThresholds::default(),
        }
    }
}

/// Events produced by the coordinator, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Processed(FragmentResult),
    Backpressure(BackpressureState),
}

/// Outcome of [`PipelineCoordinator::admit`].
#[derive(Debug)]
pub enum Admission {
    /// The fragment is in the pipeline; its result arrives as an event.
    Accepted,
    /// The fragment was answered immediately and never entered the pipeline.
    Rejected(Box<FragmentResult>),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

struct FlowState {
    tracker: BackpressureTracker,
    queue: OrderingQueue<FragmentResult>,
    stats: SessionStats,
}

/// Runs fragments of one stream through the stages.
#[derive(Clone)]
pub struct PipelineCoordinator {
    stages: StageSet,
    config: Arc<CoordinatorConfig>,
    flow: Arc<Mutex<FlowState>>,
    slots: Arc<Semaphore>,
    tasks: Arc<Mutex<JoinSet<()>>>,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl PipelineCoordinator {
    /// Creates a coordinator for a stream whose first sequence number is 0.
    pub fn new(
        stages: StageSet,
        config: CoordinatorConfig,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        let flow = FlowState {
            tracker: BackpressureTracker::new(config.max_inflight, config.backpressure),
            queue: OrderingQueue::with_window(
                0,
                config.backpressure.reject_above + defaults::SEQUENCE_WINDOW_MARGIN,
            ),
            stats: SessionStats::new(),
        };
        Self {
            stages,
            slots: Arc::new(Semaphore::new(config.max_inflight.max(1))),
            config: Arc::new(config),
            flow: Arc::new(Mutex::new(flow)),
            tasks: Arc::new(Mutex::new(JoinSet::new())),
            events,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn backpressure(&self) -> BackpressureState {
        self.flow.lock().await.tracker.state()
    }

    pub async fn in_flight(&self) -> usize {
        self.flow.lock().await.tracker.in_flight()
    }

    /// Admits a fragment into the pipeline or answers it with a rejection.
    ///
    /// Rejections never reserve a sequence number, so the caller may
    /// resubmit the same fragment later. The fragment at the head of the
    /// ordering queue is never rejected for backpressure: its delivery is
    /// what releases the results queued behind it.
    pub async fn admit(&self, fragment: Fragment) -> Admission {
        if let Err(message) = fragment
            .audio
            .validate(self.config.sample_rate, self.config.channels)
        {
            let mut flow = self.flow.lock().await;
            return reject(
                &mut flow,
                &fragment,
                Stage::Recognition,
                &StageFailure::InvalidAudio { message },
            );
        }

        let sequence = fragment.sequence_number;
        let mut flow = self.flow.lock().await;

        let next_expected = flow.queue.next_expected();
        if sequence >= next_expected && !flow.queue.in_window(sequence) {
            return reject(
                &mut flow,
                &fragment,
                Stage::Session,
                &StageFailure::SequenceOutOfWindow {
                    sequence_number: sequence,
                    next_expected,
                },
            );
        }

        if !flow.queue.can_reserve(sequence) {
            return reject(
                &mut flow,
                &fragment,
                Stage::Session,
                &StageFailure::DuplicateSequence {
                    sequence_number: sequence,
                },
            );
        }

        if flow.tracker.should_reject() && sequence != flow.queue.next_expected() {
            let in_flight = flow.tracker.in_flight();
            return reject(
                &mut flow,
                &fragment,
                Stage::Session,
                &StageFailure::BackpressureExceeded { in_flight },
            );
        }

        if let Err(e) = flow.queue.reserve(sequence) {
            warn!(stream_id = %fragment.stream_id, sequence, error = %e, "reserve failed");
            return reject(
                &mut flow,
                &fragment,
                Stage::Session,
                &StageFailure::DuplicateSequence {
                    sequence_number: sequence,
                },
            );
        }

        flow.stats.record_accepted();
        if let Some(state) = flow.tracker.on_accept() {
            info!(
                stream_id = %fragment.stream_id,
                in_flight = state.current_inflight,
                severity = ?state.severity,
                "Backpressure changed"
            );
            self.emit(PipelineEvent::Backpressure(state));
        }
        drop(flow);

        debug!(stream_id = %fragment.stream_id, sequence, "Fragment accepted");

        let worker = self.clone();
        let accepted_at = Instant::now();
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move { worker.run(fragment, accepted_at).await });

        Admission::Accepted
    }

    /// Counts a rejection decided outside the coordinator (session state).
    pub async fn record_rejection(&self, result: &FragmentResult) {
        self.flow.lock().await.stats.record_rejected(result);
    }

    /// Waits for every accepted fragment, then releases whatever is still
    /// buffered behind gaps.
    ///
    /// Returns the sequence numbers that were never answered by the
    /// pipeline. Callers must stop admitting before calling this.
    pub async fn finish(&self) -> Vec<u64> {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Fragment task failed");
            }
        }

        let mut flow = self.flow.lock().await;
        let (released, skipped) = flow.queue.flush();
        for result in released {
            self.release(&mut flow, result);
        }
        if !skipped.is_empty() {
            warn!(?skipped, "Stream ended with unanswered sequence numbers");
        }
        skipped
    }

    /// Final statistics for the stream.
    pub async fn summary(
        &self,
        stream_id: &str,
        session_id: &str,
        started_at: DateTime<Utc>,
        skipped_sequences: Vec<u64>,
    ) -> SessionSummary {
        let flow = self.flow.lock().await;
        SessionSummary::new(
            stream_id,
            session_id,
            started_at,
            &flow.stats,
            skipped_sequences,
        )
    }

    async fn run(self, fragment: Fragment, accepted_at: Instant) {
        let mut result = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => {
                let queued_ms = elapsed_ms(accepted_at);
                let worker = self.clone();
                let owned = fragment.clone();
                let stage_work = tokio::spawn(async move {
                    let _permit = permit;
                    worker.process(&owned).await
                });

                let mut result = match stage_work.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(
                            stream_id = %fragment.stream_id,
                            sequence = fragment.sequence_number,
                            error = %e,
                            "Stage task aborted"
                        );
                        let what = if e.is_panic() { "panicked" } else { "was cancelled" };
                        FragmentResult::rejected(
                            &fragment,
                            Stage::Session,
                            &StageFailure::Internal {
                                message: format!("stage processing {}", what),
                            },
                        )
                    }
                };
                result.timings.queued_ms = queued_ms;
                result
            }
            Err(_) => FragmentResult::rejected(
                &fragment,
                Stage::Session,
                &StageFailure::Internal {
                    message: "processing slots closed".to_string(),
                },
            ),
        };
        result.processing_time_ms = elapsed_ms(accepted_at);
        self.deliver(result).await;
    }

    async fn deliver(&self, result: FragmentResult) {
        let sequence = result.sequence_number;
        let mut flow = self.flow.lock().await;
        if let Err(e) = flow.queue.submit(sequence, result) {
            error!(sequence, error = %e, "Dropping result that cannot be ordered");
            return;
        }
        let ready: Vec<FragmentResult> = flow.queue.drain().collect();
        for result in ready {
            self.release(&mut flow, result);
        }
    }

    fn release(&self, flow: &mut FlowState, result: FragmentResult) {
        flow.stats.record_delivered(&result);
        debug!(
            stream_id = %result.stream_id,
            sequence = result.sequence_number,
            status = result.status.as_str(),
            "Fragment delivered"
        );
        self.emit(PipelineEvent::Processed(result));

        if let Some(state) = flow.tracker.on_deliver() {
            info!(
                in_flight = state.current_inflight,
                severity = ?state.severity,
                "Backpressure changed"
            );
            self.emit(PipelineEvent::Backpressure(state));
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            debug!("Pipeline event receiver dropped");
        }
    }

    /// Runs recognition, translation and synthesis for one fragment.
    ///
    /// A failed stage ends processing; later stages are never invoked.
    /// Never fails: every outcome is a [`FragmentResult`].
    pub async fn process(&self, fragment: &Fragment) -> FragmentResult {
        let started = Instant::now();
        let origin = fragment.origin();
        let config = &self.config;
        let mut run = StageRun {
            fragment,
            started,
            timings: StageTimings::default(),
            lineage: Vec::new(),
        };

        let mut transcript = self
            .invoke(
                Stage::Recognition,
                fragment,
                &mut run.timings,
                self.stages.recognizer.recognize(RecognitionRequest {
                    origin: origin.clone(),
                    audio: fragment.audio.clone(),
                    language: config.source_language.clone(),
                }),
                |failure| TranscriptAsset::failed(&origin, failure),
            )
            .await;
        adopt(&mut transcript.meta, &origin, None);
        run.lineage.push(transcript.lineage_entry());

        if let Some(error) = transcript.status().error().cloned() {
            return run.failed(error, Some(transcript.text), None);
        }
        if transcript.is_empty() {
            let translation = TranslationAsset::success(
                &origin,
                transcript.asset_id(),
                "",
                transcript.text.clone(),
                config.source_language.clone(),
                config.target_language.clone(),
            );
            run.lineage.push(translation.lineage_entry());
            return self.fallback(run, &origin, transcript.text, translation);
        }

        let mut translation = self
            .invoke(
                Stage::Translation,
                fragment,
                &mut run.timings,
                self.stages.translator.translate(TranslationRequest {
                    origin: origin.clone(),
                    parent: transcript.asset_id(),
                    text: transcript.text.clone(),
                    source_language: config.source_language.clone(),
                    target_language: config.target_language.clone(),
                }),
                |failure| TranslationAsset::failed(&origin, transcript.asset_id(), failure),
            )
            .await;
        adopt(&mut translation.meta, &origin, Some(transcript.asset_id()));
        run.lineage.push(translation.lineage_entry());

        if let Some(error) = translation.status().error().cloned() {
            return run.failed(error, Some(transcript.text), None);
        }
        if translation.is_empty() {
            return self.fallback(run, &origin, transcript.text, translation);
        }

        let mut audio = self
            .invoke(
                Stage::Synthesis,
                fragment,
                &mut run.timings,
                self.stages.synthesizer.synthesize(SynthesisRequest {
                    origin: origin.clone(),
                    parent: translation.asset_id(),
                    text: translation.text.clone(),
                    language: config.target_language.clone(),
                    voice: config.voice.clone(),
                    target_duration_ms: fragment.duration_ms(),
                    sample_rate: fragment.audio.sample_rate,
                    channels: fragment.audio.channels,
                }),
                |failure| AudioAsset::failed(&origin, translation.asset_id(), failure),
            )
            .await;
        adopt(&mut audio.meta, &origin, Some(translation.asset_id()));

        if !audio.is_failed() {
            self.grade(&mut audio, fragment.duration_ms());
        }
        run.lineage.push(audio.lineage_entry());

        let duration_match = audio.duration_match.clone();
        let mut result = match audio.meta.status {
            AssetStatus::Failed { error } => {
                run.failed(error, Some(transcript.text), Some(translation.text))
            }
            AssetStatus::Partial { warning } => run.dubbed(
                audio.audio,
                Some(warning),
                transcript.text,
                translation.text,
            ),
            AssetStatus::Success => {
                run.dubbed(audio.audio, None, transcript.text, translation.text)
            }
        };
        result.duration_match = duration_match;
        result
    }

    /// Awaits one stage under the stage timeout and records its wall time.
    async fn invoke<A, F>(
        &self,
        stage: Stage,
        fragment: &Fragment,
        timings: &mut StageTimings,
        work: F,
        on_timeout: impl FnOnce(&StageFailure) -> A,
    ) -> A
    where
        A: AssetRecord,
        F: Future<Output = A>,
    {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.config.stage_timeout, work).await;
        let elapsed = elapsed_ms(start);
        timings.record(stage, elapsed);

        let mut asset = match outcome {
            Ok(asset) => asset,
            Err(_) => on_timeout(&StageFailure::Timeout {
                after_ms: self.config.stage_timeout.as_millis() as u64,
            }),
        };
        if asset.meta().latency_ms == 0 {
            asset.meta_mut().latency_ms = elapsed;
        }

        match asset.status().error() {
            Some(error) => warn!(
                stream_id = %fragment.stream_id,
                sequence = fragment.sequence_number,
                stage = %stage,
                code = %error.code,
                retryable = error.retryable,
                "Stage failed: {}",
                error.message
            ),
            None => debug!(
                stream_id = %fragment.stream_id,
                sequence = fragment.sequence_number,
                stage = %stage,
                elapsed_ms = elapsed,
                "Stage finished"
            ),
        }
        asset
    }

    /// Short-circuit for fragments without speech or without translated text.
    fn fallback(
        &self,
        mut run: StageRun<'_>,
        origin: &AssetOrigin,
        transcript: String,
        translation: TranslationAsset,
    ) -> FragmentResult {
        let payload = self.config.fallback.audio(run.fragment);
        let audio = AudioAsset::success(
            origin,
            translation.asset_id(),
            payload.clone(),
            self.config.voice.clone(),
        );
        run.lineage.push(audio.lineage_entry());
        debug!(
            stream_id = %run.fragment.stream_id,
            sequence = run.fragment.sequence_number,
            fallback = self.config.fallback.as_str(),
            "Nothing to dub"
        );
        run.dubbed(payload, None, transcript, translation.text)
    }

    /// Applies the duration policy, time-stretching first when enabled.
    fn grade(&self, audio: &mut AudioAsset, original_ms: u64) {
        let policy = &self.config.duration;
        let mut evaluation = policy.evaluate(original_ms, audio.duration_ms());

        if self.config.time_stretch && evaluation.grade != DurationGrade::Success {
            if let Some(ratio) = policy.speed_ratio(original_ms, audio.duration_ms()) {
                audio.audio = stretch_to(&audio.audio, original_ms);
                evaluation = policy.evaluate(original_ms, audio.duration_ms());
                evaluation.details.speed_ratio = ratio;
                evaluation.details.stretched = true;
            }
        }

        let status = graded_status(&evaluation);
        audio.grade(evaluation.details, status);
    }
}

/// Accumulated state of one fragment's trip through the stages.
struct StageRun<'a> {
    fragment: &'a Fragment,
    started: Instant,
    timings: StageTimings,
    lineage: Vec<crate::pipeline::asset::LineageEntry>,
}

impl StageRun<'_> {
    fn failed(
        self,
        error: ClassifiedError,
        transcript: Option<String>,
        translated_text: Option<String>,
    ) -> FragmentResult {
        let mut result = FragmentResult::failed(self.fragment, error);
        result.transcript = transcript;
        result.translated_text = translated_text;
        self.finish(result)
    }

    fn dubbed(
        self,
        audio: AudioPayload,
        warning: Option<crate::pipeline::asset::Warning>,
        transcript: String,
        translated_text: String,
    ) -> FragmentResult {
        let mut result = FragmentResult::dubbed(self.fragment, audio, warning);
        result.transcript = Some(transcript);
        result.translated_text = Some(translated_text);
        self.finish(result)
    }

    fn finish(self, mut result: FragmentResult) -> FragmentResult {
        result.processing_time_ms = elapsed_ms(self.started);
        result.timings = self.timings;
        result.lineage = self.lineage;
        result
    }
}

fn reject(
    flow: &mut FlowState,
    fragment: &Fragment,
    stage: Stage,
    failure: &StageFailure,
) -> Admission {
    let result = FragmentResult::rejected(fragment, stage, failure);
    debug!(
        stream_id = %fragment.stream_id,
        sequence = fragment.sequence_number,
        code = %failure.code(),
        "Fragment rejected"
    );
    flow.stats.record_rejected(&result);
    Admission::Rejected(Box::new(result))
}

/// Identity and lineage come from the coordinator, whatever the stage set.
fn adopt(meta: &mut AssetMeta, origin: &AssetOrigin, parent: Option<AssetId>) {
    meta.fragment_id.clone_from(&origin.fragment_id);
    meta.stream_id.clone_from(&origin.stream_id);
    meta.parent_asset_ids = parent.into_iter().collect();
}

fn graded_status(evaluation: &DurationEvaluation) -> AssetStatus {
    if let Some(failure) = evaluation.failure() {
        AssetStatus::Failed {
            error: classify(Stage::Synthesis, &failure),
        }
    } else if let Some(warning) = evaluation.warning() {
        AssetStatus::Partial { warning }
    } else {
        AssetStatus::Success
    }
}

fn stretch_to(audio: &AudioPayload, target_ms: u64) -> AudioPayload {
    let target_frames = pcm::sample_count(audio.sample_rate, 1, target_ms);
    let samples = pcm::stretch(&audio.samples(), audio.channels, target_frames);
    AudioPayload::from_samples(&samples, audio.sample_rate, audio.channels)
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
