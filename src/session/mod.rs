//! Stream session: one caller's stream from `stream:init` to `stream:complete`.
//!
//! A session owns its coordinator (and through it the backpressure tracker
//! and ordering queue). Nothing mutable is shared between sessions; the
//! stage capabilities are shared through [`StageSet`].

pub mod config;
pub mod state;
pub mod stats;

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::coordinator::{Admission, PipelineCoordinator, PipelineEvent};
use crate::pipeline::error::{Stage, StageFailure};
use crate::pipeline::types::{Fragment, FragmentResult};
use crate::stages::{Capabilities, StageSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

pub use config::{SessionConfig, StreamConfig};
pub use state::{SessionRequest, SessionState};
pub use stats::{SessionStats, SessionSummary};

/// Payload of `stream:ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyInfo {
    pub stream_id: String,
    pub session_id: String,
    pub max_inflight: usize,
    pub capabilities: Capabilities,
}

pub struct StreamSession {
    session_id: String,
    config: SessionConfig,
    state: SessionState,
    started_at: DateTime<Utc>,
    stages: StageSet,
    coordinator: PipelineCoordinator,
}

impl StreamSession {
    /// Creates a session in `initializing`. Call [`start`](Self::start) next.
    ///
    /// Processed results and backpressure notifications are sent to `events`.
    pub fn new(
        init: StreamConfig,
        config: &Config,
        stages: StageSet,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        let session = init.resolve(config);
        let coordinator =
            PipelineCoordinator::new(stages.clone(), session.coordinator_config(config), events);
        Self {
            session_id: Uuid::new_v4().to_string(),
            config: session,
            state: SessionState::Initializing,
            started_at: Utc::now(),
            stages,
            coordinator,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stream_id(&self) -> &str {
        &self.config.stream_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &PipelineCoordinator {
        &self.coordinator
    }

    /// Validates the configuration and enters `ready`.
    ///
    /// On failure the session goes straight to `completed`.
    pub fn start(&mut self) -> Result<ReadyInfo> {
        if let Err(e) = self.config.validate(&self.stages) {
            warn!(stream_id = %self.config.stream_id, error = %e, "Session validation failed");
            self.state = self.state.transition(SessionRequest::ValidationFailed)?;
            return Err(e);
        }
        self.state = self.state.transition(SessionRequest::Validated)?;

        info!(
            stream_id = %self.config.stream_id,
            session_id = %self.session_id,
            source = %self.config.source_language,
            target = %self.config.target_language,
            max_inflight = self.config.max_inflight,
            "Session ready"
        );

        Ok(ReadyInfo {
            stream_id: self.config.stream_id.clone(),
            session_id: self.session_id.clone(),
            max_inflight: self.config.max_inflight,
            capabilities: self.stages.capabilities(),
        })
    }

    /// Hands a fragment to the pipeline, or rejects it if the session does
    /// not accept fragments right now.
    pub async fn submit(&self, fragment: Fragment) -> Admission {
        let failure = match self.state {
            SessionState::Ready if fragment.stream_id == self.config.stream_id => {
                return self.coordinator.admit(fragment).await;
            }
            SessionState::Ready => StageFailure::SessionNotReady {
                message: format!(
                    "fragment for stream '{}' sent to stream '{}'",
                    fragment.stream_id, self.config.stream_id
                ),
            },
            SessionState::Paused => StageFailure::StreamPaused,
            other => StageFailure::SessionNotReady {
                message: format!("session is {}", other),
            },
        };

        let result = FragmentResult::rejected(&fragment, Stage::Session, &failure);
        self.coordinator.record_rejection(&result).await;
        Admission::Rejected(Box::new(result))
    }

    /// Stops accepting new fragments; in-flight ones continue.
    pub fn pause(&mut self) -> Result<()> {
        self.state = self.state.transition(SessionRequest::Pause)?;
        info!(stream_id = %self.config.stream_id, "Session paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.state = self.state.transition(SessionRequest::Resume)?;
        info!(stream_id = %self.config.stream_id, "Session resumed");
        Ok(())
    }

    /// Drains all in-flight fragments and reports final statistics.
    ///
    /// Every result is sent on the event channel before this returns.
    pub async fn end(&mut self) -> Result<SessionSummary> {
        self.state = self.state.transition(SessionRequest::End)?;
        info!(stream_id = %self.config.stream_id, "Session ending");

        let skipped = self.coordinator.finish().await;
        self.state = self.state.transition(SessionRequest::Drained)?;

        let summary = self
            .coordinator
            .summary(
                &self.config.stream_id,
                &self.session_id,
                self.started_at,
                skipped,
            )
            .await;

        match &summary.latency {
            Some(latency) => info!(
                stream_id = %self.config.stream_id,
                accepted = summary.accepted,
                rejected = summary.rejected,
                "Session completed: {}",
                latency.summary_line()
            ),
            None => info!(
                stream_id = %self.config.stream_id,
                rejected = summary.rejected,
                "Session completed without processed fragments"
            ),
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm;
    use crate::pipeline::error::ErrorCode;
    use crate::pipeline::types::AudioPayload;

    fn fragment(stream_id: &str, seq: u64) -> Fragment {
        let samples = pcm::tone(16000, 1, 200, 330.0, 0.4);
        Fragment::new(
            format!("{stream_id}-{seq}"),
            stream_id,
            seq,
            AudioPayload::from_samples(&samples, 16000, 1),
        )
    }

    fn session(init: StreamConfig) -> (StreamSession, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            StreamSession::new(init, &Config::default(), StageSet::loopback(), tx),
            rx,
        )
    }

    fn rejection_code(admission: Admission) -> Option<ErrorCode> {
        match admission {
            Admission::Rejected(result) => result.error.map(|e| e.code),
            Admission::Accepted => None,
        }
    }

    #[tokio::test]
    async fn test_start_reports_ready_info() {
        let (mut session, _rx) = session(StreamConfig::new("talk"));
        assert_eq!(session.state(), SessionState::Initializing);

        let ready = session.start().unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(ready.stream_id, "talk");
        assert_eq!(ready.session_id, session.session_id());
        assert_eq!(ready.max_inflight, 3);
        assert_eq!(ready.capabilities.synthesizer, "loopback-synthesizer");
    }

    #[tokio::test]
    async fn test_invalid_config_completes_without_ready() {
        let (mut session, _rx) = session(StreamConfig {
            channels: Some(0),
            ..StreamConfig::new("talk")
        });
        assert!(session.start().is_err());
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_fragment_before_start_is_not_ready() {
        let (session, _rx) = session(StreamConfig::new("talk"));
        assert_eq!(
            rejection_code(session.submit(fragment("talk", 0)).await),
            Some(ErrorCode::SessionNotReady)
        );
    }

    #[tokio::test]
    async fn test_wrong_stream_id_is_not_ready() {
        let (mut session, _rx) = session(StreamConfig::new("talk"));
        session.start().unwrap();
        assert_eq!(
            rejection_code(session.submit(fragment("other", 0)).await),
            Some(ErrorCode::SessionNotReady)
        );
    }

    #[tokio::test]
    async fn test_paused_session_rejects_then_resumes() {
        let (mut session, mut rx) = session(StreamConfig::new("talk"));
        session.start().unwrap();
        session.pause().unwrap();

        assert_eq!(
            rejection_code(session.submit(fragment("talk", 0)).await),
            Some(ErrorCode::StreamPaused)
        );

        session.resume().unwrap();
        assert!(session.submit(fragment("talk", 0)).await.is_accepted());

        let summary = session.end().await.unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(summary.received, 2);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.errors.get("stream_paused"), Some(&1));

        match rx.recv().await {
            Some(PipelineEvent::Processed(result)) => assert_eq!(result.sequence_number, 0),
            other => panic!("expected processed event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_twice_is_an_error() {
        let (mut session, _rx) = session(StreamConfig::new("talk"));
        session.start().unwrap();
        session.end().await.unwrap();
        assert!(session.end().await.is_err());
        assert_eq!(
            rejection_code(session.submit(fragment("talk", 1)).await),
            Some(ErrorCode::SessionNotReady)
        );
    }
}
