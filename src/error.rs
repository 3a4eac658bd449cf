//! Failure taxonomy for a pipeline run.
//!
//! Collaborators (sources, engines, encoders, logs) report `anyhow::Error`; the
//! scheduler classifies those into `PipelineError` so the host always learns which
//! frame failed and why.

use thiserror::Error;

use crate::run::RunState;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The input cannot be opened or read at all.
    #[error("source unavailable{}: {reason}", at_frame(.frame_index))]
    SourceUnavailable {
        frame_index: Option<u64>,
        reason: String,
    },

    /// The output sink could not be opened.
    #[error("output sink unavailable: {reason}")]
    SinkUnavailable { reason: String },

    /// A single frame could not be decoded. The run skips the frame and keeps it
    /// in `RunReport::decode_faults`; this is the only variant that never ends a
    /// run.
    #[error("decode fault on frame {frame_index}: {reason}")]
    DecodeFault { frame_index: u64, reason: String },

    /// The inference engine failed, timed out, or returned a malformed result.
    #[error("inference failed on frame {frame_index}: {reason}")]
    Inference { frame_index: u64, reason: String },

    /// The encoder rejected an annotated frame.
    #[error("encoder rejected frame {frame_index}: {reason}")]
    Encode { frame_index: u64, reason: String },

    /// The run log could not record a processed frame.
    #[error("run log append failed for frame {frame_index}: {reason}")]
    Log { frame_index: u64, reason: String },

    /// Operation not permitted in the run's current state.
    #[error("cannot {operation} a run in state {state}")]
    Lifecycle {
        operation: &'static str,
        state: RunState,
    },
}

impl PipelineError {
    /// Frame the error is attached to, when there is one.
    pub fn frame_index(&self) -> Option<u64> {
        match self {
            Self::SourceUnavailable { frame_index, .. } => *frame_index,
            Self::DecodeFault { frame_index, .. }
            | Self::Inference { frame_index, .. }
            | Self::Encode { frame_index, .. }
            | Self::Log { frame_index, .. } => Some(*frame_index),
            Self::SinkUnavailable { .. } | Self::Lifecycle { .. } => None,
        }
    }
}

fn at_frame(frame_index: &Option<u64>) -> String {
    match frame_index {
        Some(index) => format!(" at frame {}", index),
        None => String::new(),
    }
}

/// Renders an `anyhow` error with its context chain on one line.
pub(crate) fn reason(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
