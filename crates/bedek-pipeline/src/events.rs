//! Pipeline event bus.
//!
//! Lifecycle transitions and per-batch completions go out on a broadcast
//! channel that monitoring collaborators may subscribe to. Publishing is
//! strictly best-effort: a lagging or absent subscriber never affects
//! stream processing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::DEFAULT_EVENT_CHANNEL_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StreamCreated,
    StreamStarted,
    StreamPaused,
    StreamResumed,
    StreamStopped,
    StreamCompleted,
    StreamError,
    BatchProcessed,
    SessionSubmitted,
    SessionCompleted,
    SessionFailed,
    PipelineMetrics,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StreamCreated => "stream_created",
            EventKind::StreamStarted => "stream_started",
            EventKind::StreamPaused => "stream_paused",
            EventKind::StreamResumed => "stream_resumed",
            EventKind::StreamStopped => "stream_stopped",
            EventKind::StreamCompleted => "stream_completed",
            EventKind::StreamError => "stream_error",
            EventKind::BatchProcessed => "batch_processed",
            EventKind::SessionSubmitted => "session_submitted",
            EventKind::SessionCompleted => "session_completed",
            EventKind::SessionFailed => "session_failed",
            EventKind::PipelineMetrics => "pipeline_metrics",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Cloneable handle to the shared broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. A send error only means nobody is listening.
    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        let event = PipelineEvent {
            kind,
            timestamp: Utc::now(),
            payload,
        };
        if let Err(err) = self.sender.send(event) {
            debug!(kind = %kind, error = %err, "event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}
