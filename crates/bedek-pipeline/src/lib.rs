//! Stream processing and session orchestration for inspection records.
//!
//! Two layers live here. The [`StreamManager`] owns long-lived record
//! streams: each stream buffers incoming records into batches, dispatches
//! them to a [`BatchProcessor`] under a concurrency bound, and exposes a
//! pause/resume/stop lifecycle with per-stream metrics. The
//! [`Orchestrator`] sits above it: it accepts [`ProcessingRequest`]s,
//! tracks each as a [`ProcessingSession`], and routes it to the batch path
//! or a stream according to its mode, with priority dispatch, pipeline
//! metrics, and stale-session sweeping running as background loops.
//!
//! Failure containment mirrors the rest of the pipeline: a bad batch never
//! kills a stream, a bad stream never kills a session, and a failed
//! session never touches its siblings.

pub mod config;
pub mod control;
pub mod events;
pub mod filter;
pub mod insight;
pub mod metrics;
pub mod orchestrator;
pub mod session;
pub mod stream;

pub use config::PipelineConfig;
pub use control::ControlCommand;
pub use events::{EventBus, EventKind, PipelineEvent};
pub use filter::{FilterRule, TransformRule};
pub use insight::{InsightBridge, NoopInsightBridge};
pub use metrics::StreamMetrics;
pub use orchestrator::Orchestrator;
pub use session::{
    ProcessingMode, ProcessingRequest, ProcessingSession, RequestSource, SessionStatus,
    SessionStatusSnapshot, SourceKind,
};
pub use stream::{
    BatchContext, BatchOutcome, BatchProcessor, QualityBatchProcessor, StreamConfig, StreamManager,
    StreamState, StreamType,
};
