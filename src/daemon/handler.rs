//! Per-connection delivery layer.
//!
//! Turns client events into session calls and forwards everything the
//! coordinator produces to the connection's writer. The coordinator never
//! touches the socket.

use crate::config::Config;
use crate::error::DubError;
use crate::ipc::protocol::{ClientEvent, FragmentAck, ServerEvent};
use crate::ipc::server::{ConnectionHandler, EventReceiver, EventSender};
use crate::pipeline::coordinator::{Admission, PipelineEvent};
use crate::pipeline::error::{ErrorCode, Stage, StageFailure};
use crate::pipeline::types::{Fragment, FragmentResult};
use crate::session::{StreamConfig, StreamSession};
use crate::stages::StageSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Serves dubbing sessions, one per connection.
pub struct StreamHandler {
    config: Arc<Config>,
    stages: StageSet,
}

impl StreamHandler {
    pub fn new(config: Config, stages: StageSet) -> Self {
        Self {
            config: Arc::new(config),
            stages,
        }
    }
}

#[async_trait::async_trait]
impl ConnectionHandler for StreamHandler {
    async fn serve(&self, incoming: EventReceiver, outgoing: EventSender) {
        let connection = Connection {
            config: Arc::clone(&self.config),
            stages: self.stages.clone(),
            outgoing,
            active: None,
        };
        connection.run(incoming).await;
    }
}

struct ActiveSession {
    session: StreamSession,
    events: mpsc::UnboundedReceiver<PipelineEvent>,
}

enum Input {
    Client(Option<ClientEvent>),
    Pipeline(PipelineEvent),
}

/// Whether the connection should stay open after an event.
enum Flow {
    Continue,
    Close,
}

struct Connection {
    config: Arc<Config>,
    stages: StageSet,
    outgoing: EventSender,
    active: Option<ActiveSession>,
}

impl Connection {
    async fn run(mut self, mut incoming: EventReceiver) {
        loop {
            let input = match &mut self.active {
                Some(active) => tokio::select! {
                    event = incoming.recv() => Input::Client(event),
                    Some(event) = active.events.recv() => Input::Pipeline(event),
                },
                None => Input::Client(incoming.recv().await),
            };

            match input {
                Input::Pipeline(event) => self.forward(event),
                Input::Client(None) => {
                    if self.active.is_some() {
                        debug!("Peer disconnected with a live session, draining");
                        self.finish_session().await;
                    }
                    break;
                }
                Input::Client(Some(event)) => {
                    if let Flow::Close = self.dispatch(event).await {
                        self.linger(&mut incoming).await;
                        break;
                    }
                }
            }
        }
    }

    /// Keeps answering the peer for the completion grace period after
    /// `stream:complete`, so nothing sent after `stream:end` goes unanswered.
    async fn linger(&mut self, incoming: &mut EventReceiver) {
        while let Ok(event) = incoming.try_recv() {
            self.refuse(event).await;
        }

        let grace = Duration::from_millis(self.config.server.completion_grace_ms);
        let deadline = tokio::time::Instant::now() + grace;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, incoming.recv()).await {
            self.refuse(event).await;
        }
    }

    /// Answers an event that arrived after the stream ended.
    async fn refuse(&mut self, event: ClientEvent) {
        let stream_id = match event {
            ClientEvent::FragmentData(fragment) => {
                self.fragment(fragment).await;
                return;
            }
            ClientEvent::StreamInit(init) => init.stream_id,
            ClientEvent::StreamPause { stream_id }
            | ClientEvent::StreamResume { stream_id }
            | ClientEvent::StreamEnd { stream_id } => stream_id,
        };
        self.send(ServerEvent::error(
            ErrorCode::SessionNotReady,
            format!("stream '{}' has ended", stream_id),
            Some(&stream_id),
        ));
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Flow {
        debug!(event = event.name(), "Client event");
        match event {
            ClientEvent::StreamInit(init) => self.init(init),
            ClientEvent::FragmentData(fragment) => self.fragment(fragment).await,
            ClientEvent::StreamPause { stream_id } => {
                self.control(&stream_id, |session| session.pause())
            }
            ClientEvent::StreamResume { stream_id } => {
                self.control(&stream_id, |session| session.resume())
            }
            ClientEvent::StreamEnd { stream_id } => {
                if self.session_for(&stream_id).is_none() {
                    return Flow::Continue;
                }
                self.finish_session().await;
                return Flow::Close;
            }
        }
        Flow::Continue
    }

    fn init(&mut self, init: StreamConfig) {
        if let Some(active) = &self.active {
            self.send(ServerEvent::error(
                ErrorCode::SessionNotReady,
                format!(
                    "connection already carries stream '{}'",
                    active.session.stream_id()
                ),
                Some(&init.stream_id),
            ));
            return;
        }

        let stream_id = init.stream_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = StreamSession::new(init, &self.config, self.stages.clone(), tx);

        match session.start() {
            Ok(ready) => {
                self.send(ServerEvent::StreamReady(ready));
                self.active = Some(ActiveSession {
                    session,
                    events: rx,
                });
            }
            Err(e) => self.send_error(&e, Some(&stream_id)),
        }
    }

    async fn fragment(&mut self, fragment: Fragment) {
        self.send(ServerEvent::FragmentAck(FragmentAck::for_fragment(&fragment)));

        let admission = match &self.active {
            Some(active) => active.session.submit(fragment).await,
            None => {
                let failure = StageFailure::SessionNotReady {
                    message: format!("no session for stream '{}'", fragment.stream_id),
                };
                Admission::Rejected(Box::new(FragmentResult::rejected(
                    &fragment,
                    Stage::Session,
                    &failure,
                )))
            }
        };

        if let Admission::Rejected(result) = admission {
            self.send(ServerEvent::FragmentProcessed(*result));
        }
    }

    fn control<F>(&mut self, stream_id: &str, request: F)
    where
        F: FnOnce(&mut StreamSession) -> crate::error::Result<()>,
    {
        let Some(session) = self.session_for(stream_id) else {
            return;
        };
        if let Err(e) = request(session) {
            self.send_error(&e, Some(stream_id));
        }
    }

    /// The live session if it carries `stream_id`; otherwise reports
    /// `session_not_ready` and returns `None`.
    fn session_for(&mut self, stream_id: &str) -> Option<&mut StreamSession> {
        let matches = self
            .active
            .as_ref()
            .is_some_and(|active| active.session.stream_id() == stream_id);
        if !matches {
            self.send(ServerEvent::error(
                ErrorCode::SessionNotReady,
                format!("no session for stream '{}'", stream_id),
                Some(stream_id),
            ));
            return None;
        }
        self.active.as_mut().map(|active| &mut active.session)
    }

    /// Ends the live session, forwarding results while it drains, then
    /// reports `stream:complete`.
    async fn finish_session(&mut self) {
        let Some(ActiveSession {
            mut session,
            mut events,
        }) = self.active.take()
        else {
            return;
        };
        let stream_id = session.stream_id().to_string();

        let ended = {
            let end = session.end();
            tokio::pin!(end);
            loop {
                tokio::select! {
                    ended = &mut end => break ended,
                    Some(event) = events.recv() => {
                        self.send(ServerEvent::from_pipeline(&stream_id, event));
                    }
                }
            }
        };

        // The drain joined every task, so the rest is already queued.
        while let Ok(event) = events.try_recv() {
            self.send(ServerEvent::from_pipeline(&stream_id, event));
        }

        match ended {
            Ok(summary) => {
                info!(stream_id = %stream_id, answered = summary.answered(), "Stream complete");
                self.send(ServerEvent::StreamComplete(summary));
            }
            Err(e) => self.send_error(&e, Some(&stream_id)),
        }
    }

    fn forward(&self, event: PipelineEvent) {
        if let Some(active) = &self.active {
            let stream_id = active.session.stream_id().to_string();
            self.send(ServerEvent::from_pipeline(&stream_id, event));
        }
    }

    fn send(&self, event: ServerEvent) {
        if self.outgoing.send(event).is_err() {
            debug!("Writer closed, dropping event");
        }
    }

    fn send_error(&self, error: &DubError, stream_id: Option<&str>) {
        warn!(code = error.code().as_str(), "Session error: {}", error);
        self.send(ServerEvent::error(error.code(), error.to_string(), stream_id));
    }
}
