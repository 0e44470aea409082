//! Operational control channel.
//!
//! The operational-control collaborator drives streams by message rather
//! than by direct call: create, start, stop. Start hands the record
//! producer back through a oneshot so the collaborator can feed the
//! stream it asked for.

use tokio::sync::{mpsc, oneshot};

use bedek_common::{Record, Result};

use crate::stream::StreamConfig;

pub enum ControlCommand {
    CreateStream(StreamConfig),
    StartStream {
        stream_id: String,
        /// Receives the producer handle, or the error that prevented the
        /// start. A dropped receiver is the collaborator's problem, not
        /// the pipeline's.
        reply: oneshot::Sender<Result<mpsc::Sender<Record>>>,
    },
    StopStream {
        stream_id: String,
    },
}

impl std::fmt::Debug for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlCommand::CreateStream(config) => f
                .debug_tuple("CreateStream")
                .field(&config.stream_id)
                .finish(),
            ControlCommand::StartStream { stream_id, .. } => f
                .debug_struct("StartStream")
                .field("stream_id", stream_id)
                .finish(),
            ControlCommand::StopStream { stream_id } => f
                .debug_struct("StopStream")
                .field("stream_id", stream_id)
                .finish(),
        }
    }
}
