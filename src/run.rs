//! One pipeline run: the unit of work from `start` to a terminal state.
//!
//! A `PipelineRun` exclusively owns its frame source, its output sink and the live
//! statistics. The scheduler is the only writer; everybody else reads copies.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::ingest::{FrameSource, StreamInfo};
use crate::sink::OutputSink;
use crate::stats::{AggregateSnapshot, OccupancyScale, StatsAggregator};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl RunState {
    /// Terminal states hold no resources and are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-thread cancellation request. Observed at the next step boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A frame that was skipped because it could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecodeFaultRecord {
    pub frame_index: u64,
    pub reason: String,
}

impl From<&DecodeFaultRecord> for PipelineError {
    fn from(record: &DecodeFaultRecord) -> Self {
        PipelineError::DecodeFault {
            frame_index: record.frame_index,
            reason: record.reason.clone(),
        }
    }
}

/// Why a run ended in `Failed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunFailure {
    pub error: PipelineError,
    /// Last frame fully written to the sink, if any.
    pub last_good_frame: Option<u64>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_good_frame {
            Some(frame) => write!(f, "{} (last good frame {})", self.error, frame),
            None => write!(f, "{} (no frame completed)", self.error),
        }
    }
}

pub struct PipelineRun {
    state: RunState,
    source: Option<Box<dyn FrameSource>>,
    sink: Option<OutputSink>,
    stats: StatsAggregator,
    stream: Option<StreamInfo>,
    cancel: CancelHandle,
    decode_faults: Vec<DecodeFaultRecord>,
    failure: Option<RunFailure>,
}

impl PipelineRun {
    pub fn new(source: Box<dyn FrameSource>, sink: OutputSink) -> Self {
        Self {
            state: RunState::Idle,
            source: Some(source),
            sink: Some(sink),
            stats: StatsAggregator::default(),
            stream: None,
            cancel: CancelHandle::default(),
            decode_faults: Vec::new(),
            failure: None,
        }
    }

    pub fn with_occupancy_scale(mut self, scale: OccupancyScale) -> Self {
        self.stats = StatsAggregator::new(scale);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Copy of the live statistics.
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.stats.snapshot()
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.stream
    }

    pub fn decode_faults(&self) -> &[DecodeFaultRecord] {
        &self.decode_faults
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Last frame whose output and log record were both written.
    pub fn last_good_frame(&self) -> Option<u64> {
        let snapshot = self.stats.snapshot();
        (snapshot.frames_processed > 0).then_some(snapshot.frame_index)
    }

    /// Whether source and sink are still held.
    pub fn holds_resources(&self) -> bool {
        self.source.is_some() || self.sink.is_some()
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            state: self.state,
            snapshot: self.stats.snapshot(),
            stream: self.stream,
            decode_faults: self.decode_faults.clone(),
            failure: self.failure.as_ref().map(|failure| FailureReport {
                reason: failure.error.to_string(),
                frame_index: failure.error.frame_index(),
                last_good_frame: failure.last_good_frame,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Scheduler-side mutation
    // ------------------------------------------------------------------------

    pub(crate) fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    pub(crate) fn set_stream(&mut self, stream: StreamInfo) {
        self.stream = Some(stream);
    }

    pub(crate) fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub(crate) fn commit_stats(&mut self, stats: StatsAggregator) {
        self.stats = stats;
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats.reset();
        self.decode_faults.clear();
    }

    pub(crate) fn source_mut(&mut self) -> Option<&mut Box<dyn FrameSource>> {
        self.source.as_mut()
    }

    pub(crate) fn sink_mut(&mut self) -> Option<&mut OutputSink> {
        self.sink.as_mut()
    }

    /// Keep a skipped frame for the report. Anything but a decode fault is ignored.
    pub(crate) fn record_decode_fault(&mut self, fault: PipelineError) {
        if let PipelineError::DecodeFault {
            frame_index,
            reason,
        } = fault
        {
            self.decode_faults.push(DecodeFaultRecord {
                frame_index,
                reason,
            });
        }
    }

    pub(crate) fn set_failure(&mut self, failure: RunFailure) {
        self.failure = Some(failure);
    }

    /// Drop the source and close the sink. Safe to call more than once.
    pub(crate) fn release(&mut self) -> Result<()> {
        self.source.take();
        match self.sink.take() {
            Some(sink) => sink.close(),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub reason: String,
    pub frame_index: Option<u64>,
    pub last_good_frame: Option<u64>,
}

/// Serializable summary of a run, for hosts and `--summary-json`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub snapshot: AggregateSnapshot,
    pub stream: Option<StreamInfo>,
    pub decode_faults: Vec<DecodeFaultRecord>,
    pub failure: Option<FailureReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{SyntheticClip, SyntheticSource};
    use crate::sink::{MemoryEncoder, MemoryRunLog};

    fn run() -> PipelineRun {
        PipelineRun::new(
            Box::new(SyntheticSource::new(SyntheticClip::new(3))),
            OutputSink::new(Box::new(MemoryEncoder::new()), Box::new(MemoryRunLog::new())),
        )
    }

    #[test]
    fn new_run_is_idle_and_holds_resources() {
        let run = run();
        assert_eq!(run.state(), RunState::Idle);
        assert!(run.holds_resources());
        assert_eq!(run.last_good_frame(), None);
        assert_eq!(run.snapshot(), AggregateSnapshot::default());
    }

    #[test]
    fn release_is_idempotent() {
        let mut run = run();
        run.release().unwrap();
        run.release().unwrap();
        assert!(!run.holds_resources());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let run = run();
        let handle = run.cancel_handle();
        assert!(!run.cancel_handle().is_cancelled());
        handle.cancel();
        assert!(run.cancel_handle().is_cancelled());
    }

    #[test]
    fn terminal_states() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Finished.is_terminal());
        assert!(RunState::Cancelled.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert_eq!(RunState::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn report_serializes_state_in_snake_case() {
        let json = serde_json::to_value(run().report()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["snapshot"]["detections_total"], 0);
        assert!(json["failure"].is_null());
    }
}
