//! Frame ingestion sources.
//!
//! This module provides the sources a pipeline run can pull frames from:
//! - Local video containers (feature: source-ffmpeg)
//! - Synthetic `stub://` clips with injectable decode faults (testing, demos)
//!
//! Every source is opened once, at run start, and then yields frames strictly in
//! decode order. The ingestion layer is responsible for:
//! - Assigning sequence indices (starting at 1, faulted frames included)
//! - Reporting per-frame decode faults without giving up on the stream
//! - Reporting stream metadata (frame rate, dimensions, frame count if known)
//!
//! The ingestion layer MUST NOT:
//! - Skip frames silently
//! - Reorder frames

pub mod file;
#[cfg(feature = "source-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;

pub use file::{FileConfig, FileSource};
pub use synthetic::{SyntheticClip, SyntheticSource};

use anyhow::Result;
use serde::Serialize;

use crate::frame::Frame;

/// Frame rate assumed when a container does not report one.
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Metadata reported when a source is opened.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct StreamInfo {
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub total_frames: Option<u64>,
}

/// Result of pulling from a source.
#[derive(Debug)]
pub enum NextFrame {
    Frame(Frame),
    EndOfStream,
    /// One frame could not be decoded. The stream itself is still usable.
    DecodeFault { frame_index: u64, reason: String },
}

/// Sequential frame source. Sources stay on the thread that drives the run.
///
/// `Err` from `next_frame` means the stream as a whole became unreadable; a bad
/// individual frame is reported as `NextFrame::DecodeFault` instead.
pub trait FrameSource {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Open the underlying stream. Called exactly once, before any `next_frame`.
    fn open(&mut self) -> Result<StreamInfo>;

    fn next_frame(&mut self) -> Result<NextFrame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<StreamInfo> {
        (**self).open()
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        (**self).next_frame()
    }
}
