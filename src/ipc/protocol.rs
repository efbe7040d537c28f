//! Event protocol between a streaming caller and the dubbing service.
//!
//! Every frame is one JSON object `{"event": "<name>", "data": {...}}`
//! followed by a newline. Event names use the `noun:verb` form.

use crate::pipeline::backpressure::BackpressureState;
use crate::pipeline::coordinator::PipelineEvent;
use crate::pipeline::error::ErrorCode;
use crate::pipeline::types::{Fragment, FragmentResult};
use crate::session::{ReadyInfo, SessionSummary, StreamConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events sent by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Open a session.
    #[serde(rename = "stream:init")]
    StreamInit(StreamConfig),
    /// Submit one fragment.
    #[serde(rename = "fragment:data")]
    FragmentData(Fragment),
    #[serde(rename = "stream:pause")]
    StreamPause { stream_id: String },
    #[serde(rename = "stream:resume")]
    StreamResume { stream_id: String },
    /// Finish the stream once everything in flight is delivered.
    #[serde(rename = "stream:end")]
    StreamEnd { stream_id: String },
}

impl ClientEvent {
    /// Serialize event to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StreamInit(_) => "stream:init",
            ClientEvent::FragmentData(_) => "fragment:data",
            ClientEvent::StreamPause { .. } => "stream:pause",
            ClientEvent::StreamResume { .. } => "stream:resume",
            ClientEvent::StreamEnd { .. } => "stream:end",
        }
    }
}

/// Receipt for a fragment, sent before processing starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentAck {
    pub fragment_id: String,
    pub stream_id: String,
    pub sequence_number: u64,
    pub received_at: DateTime<Utc>,
}

impl FragmentAck {
    pub fn for_fragment(fragment: &Fragment) -> Self {
        Self {
            fragment_id: fragment.fragment_id.clone(),
            stream_id: fragment.stream_id.clone(),
            sequence_number: fragment.sequence_number,
            received_at: Utc::now(),
        }
    }
}

/// Flow-control notification for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackpressureNotice {
    pub stream_id: String,
    #[serde(flatten)]
    pub state: BackpressureState,
}

/// Session-level failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

/// Events sent by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "stream:ready")]
    StreamReady(ReadyInfo),
    #[serde(rename = "fragment:ack")]
    FragmentAck(FragmentAck),
    #[serde(rename = "fragment:processed")]
    FragmentProcessed(FragmentResult),
    #[serde(rename = "backpressure")]
    Backpressure(BackpressureNotice),
    #[serde(rename = "stream:complete")]
    StreamComplete(SessionSummary),
    #[serde(rename = "error")]
    Error(ErrorNotice),
}

impl ServerEvent {
    /// Serialize event to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, stream_id: Option<&str>) -> Self {
        ServerEvent::Error(ErrorNotice {
            code,
            message: message.into(),
            stream_id: stream_id.map(str::to_string),
        })
    }

    /// Wire form of a coordinator event.
    pub fn from_pipeline(stream_id: &str, event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::Processed(result) => ServerEvent::FragmentProcessed(result),
            PipelineEvent::Backpressure(state) => ServerEvent::Backpressure(BackpressureNotice {
                stream_id: stream_id.to_string(),
                state,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::StreamReady(_) => "stream:ready",
            ServerEvent::FragmentAck(_) => "fragment:ack",
            ServerEvent::FragmentProcessed(_) => "fragment:processed",
            ServerEvent::Backpressure(_) => "backpressure",
            ServerEvent::StreamComplete(_) => "stream:complete",
            ServerEvent::Error(_) => "error",
        }
    }
}
