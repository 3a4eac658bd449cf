//! Segment Pipeline
//!
//! Streams video frames through a detection engine, writes annotated frames and a
//! per-frame statistics log, and feeds a live display, one frame per step.
//!
//! # Architecture
//!
//! A run is an explicit `PipelineRun` value driven by a `FramePipelineScheduler`:
//!
//! 1. **Resumable steps**: `step()` processes exactly one frame; the host owns the
//!    loop (`driver::drive`) and yields between steps.
//! 2. **Persist before pulling**: a frame's output and log record are written
//!    before the next frame is read, so the log never runs ahead of the
//!    committed snapshot.
//! 3. **Terminal means released**: `Finished`, `Cancelled` and `Failed` runs hold
//!    no source or sink and cannot be restarted.
//! 4. **No rollback**: on a fatal fault the output written so far is kept and the
//!    failure names the frame and the last good frame.
//!
//! # Module Structure
//!
//! - `frame`: Frames, annotated frames, detections
//! - `ingest`: Frame sources (synthetic `stub://`, local containers)
//! - `detect`: Inference engines and the deadline wrapper
//! - `stats`: Incremental statistics and occupancy
//! - `sink`: Output video and run log
//! - `display`: Display adapters, run events, snapshot history
//! - `run`, `scheduler`, `driver`: The run lifecycle
//! - `still`: Single-image mode
//! - `config`, `ui`: Host configuration and console output

pub mod config;
pub mod detect;
pub mod display;
pub mod driver;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod run;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod still;
pub mod ui;

pub use config::{EngineSettings, OutputSettings, PipelineConfig};
pub use detect::{engine_from_settings, DeadlineEngine, Inference, InferenceEngine};
pub use display::{CoalescingDisplay, DisplayAdapter, HistoryRecorder, RunEvent, RunObserver};
pub use driver::{drive, Pacing};
pub use error::PipelineError;
pub use frame::{AnnotatedFrame, Detection, Frame};
pub use ingest::{FileConfig, FileSource, FrameSource, NextFrame, StreamInfo};
pub use run::{CancelHandle, PipelineRun, RunFailure, RunReport, RunState};
pub use scheduler::{FramePipelineScheduler, StepOutcome};
pub use sink::{CsvRunLog, LogOpenMode, LogRecord, MemoryEncoder, MemoryRunLog, MjpegEncoder, OutputSink};
pub use stats::{AggregateSnapshot, OccupancyScale, StatsAggregator};

use anyhow::{Context, Result};
use std::path::Path;

/// Prepare the source and sink named by `config` and wrap them in an idle run.
///
/// Output paths are validated here but nothing is written: the files are created
/// by `FramePipelineScheduler::start` once the source has opened.
pub fn open_run(config: &PipelineConfig) -> Result<PipelineRun> {
    let source = FileSource::new(FileConfig {
        path: config.input.clone(),
    })?;
    let sink = open_sink(
        &config.output.video,
        &config.output.log,
        config.output.log_mode,
        config.output.jpeg_quality,
    )?;
    Ok(PipelineRun::new(Box::new(source), sink).with_occupancy_scale(config.occupancy_scale()?))
}

/// MJPEG video plus CSV run log. An existing log opened for append must carry the
/// run-log header.
pub fn open_sink(
    video: &Path,
    log: &Path,
    log_mode: LogOpenMode,
    jpeg_quality: u8,
) -> Result<OutputSink> {
    let encoder = MjpegEncoder::create(video, jpeg_quality)
        .with_context(|| PipelineError::SinkUnavailable {
            reason: format!("cannot open {}", video.display()),
        })?;
    let run_log = CsvRunLog::open(log, log_mode).with_context(|| PipelineError::SinkUnavailable {
        reason: format!("cannot open {}", log.display()),
    })?;
    Ok(OutputSink::new(Box::new(encoder), Box::new(run_log)))
}
