//! Output sink: the encoded video stream plus the per-frame run log.
//!
//! Both halves are append-only. Neither touches disk until the scheduler opens
//! the sink, which it does only after the source has opened. The scheduler writes
//! the frame first and the log record second, and only then pulls the next frame,
//! so after any crash the log never runs ahead of the snapshot the run last
//! committed.
//!
//! - `FrameEncoder`: ordered annotated frames into a persistent container
//! - `RecordLog`: one `LogRecord` per successfully processed frame
//!
//! File-backed implementations live in `encoder` and `run_log`; the in-memory ones
//! here back tests and embedding hosts that inspect output directly.

pub mod encoder;
pub mod run_log;

pub use encoder::{
    encode_jpeg, metadata_path, read_metadata, split_mjpeg, MjpegEncoder, StreamMetadata,
    DEFAULT_JPEG_QUALITY,
};
pub use run_log::{read_records, CsvRunLog, LogOpenMode, LOG_HEADER};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

use crate::frame::AnnotatedFrame;
use crate::ingest::StreamInfo;
use crate::stats::AggregateSnapshot;

/// One run-log line. Field order is stable and matches `LOG_HEADER`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub frame_index: u64,
    pub detections_this_frame: u64,
    pub detections_total: u64,
    pub occupancy_percent: u8,
}

impl From<&AggregateSnapshot> for LogRecord {
    fn from(snapshot: &AggregateSnapshot) -> Self {
        Self {
            frame_index: snapshot.frame_index,
            detections_this_frame: snapshot.detections_this_frame,
            detections_total: snapshot.detections_total,
            occupancy_percent: snapshot.occupancy_percent,
        }
    }
}

/// Incremental encoder. Frames must land in the container in call order.
pub trait FrameEncoder: Send {
    /// Called once the source has opened, before the first frame. File-backed
    /// encoders create their container here and not before.
    fn open(&mut self, _stream: &StreamInfo) -> Result<()> {
        Ok(())
    }

    fn append(&mut self, frame: &AnnotatedFrame) -> Result<()>;

    /// Frames accepted so far.
    fn frames_written(&self) -> u64;

    /// Flush and release the container. Appends after `finish` fail.
    fn finish(&mut self) -> Result<()>;
}

/// Append-only structured log.
pub trait RecordLog: Send {
    /// Called once the source has opened, before the first record.
    fn open(&mut self, _stream: &StreamInfo) -> Result<()> {
        Ok(())
    }

    /// Persist one record before returning.
    fn append(&mut self, record: &LogRecord) -> Result<()>;

    /// Records appended by this handle (excluding pre-existing ones).
    fn records_written(&self) -> u64;

    fn finish(&mut self) -> Result<()>;
}

/// Encoder and log owned together by one pipeline run.
pub struct OutputSink {
    encoder: Box<dyn FrameEncoder>,
    log: Box<dyn RecordLog>,
}

impl OutputSink {
    pub fn new(encoder: Box<dyn FrameEncoder>, log: Box<dyn RecordLog>) -> Self {
        Self { encoder, log }
    }

    /// Create the outputs for a stream whose source has opened.
    pub fn open(&mut self, stream: &StreamInfo) -> Result<()> {
        self.encoder.open(stream)?;
        self.log.open(stream)
    }

    pub fn append_frame(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        self.encoder.append(frame)
    }

    pub fn append_log_record(&mut self, record: &LogRecord) -> Result<()> {
        self.log.append(record)
    }

    pub fn frames_written(&self) -> u64 {
        self.encoder.frames_written()
    }

    pub fn records_written(&self) -> u64 {
        self.log.records_written()
    }

    /// Finish both halves. Both are always attempted; the encoder error wins.
    pub fn close(mut self) -> Result<()> {
        let encoder = self.encoder.finish();
        let log = self.log.finish();
        encoder.and(log)
    }
}

// ----------------------------------------------------------------------------
// In-memory implementations
// ----------------------------------------------------------------------------

/// Encoder that keeps annotated frames in memory. Clones share storage, so a test
/// can keep one clone while the run owns the other.
#[derive(Clone, Default)]
pub struct MemoryEncoder {
    frames: Arc<Mutex<Vec<AnnotatedFrame>>>,
    finished: Arc<Mutex<bool>>,
}

impl MemoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_indices(&self) -> Vec<u64> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|f| f.index())
            .collect()
    }

    pub fn frames(&self) -> Vec<AnnotatedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameEncoder for MemoryEncoder {
    fn append(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        if self.is_finished() {
            return Err(anyhow!("memory encoder already finished"));
        }
        self.frames
            .lock()
            .map_err(|_| anyhow!("memory encoder lock poisoned"))?
            .push(frame.clone());
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64
    }

    fn finish(&mut self) -> Result<()> {
        *self
            .finished
            .lock()
            .map_err(|_| anyhow!("memory encoder lock poisoned"))? = true;
        Ok(())
    }
}

/// Run log kept in memory. Clones share storage.
#[derive(Clone, Default)]
pub struct MemoryRunLog {
    records: Arc<Mutex<Vec<LogRecord>>>,
    finished: Arc<Mutex<bool>>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordLog for MemoryRunLog {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        if self.is_finished() {
            return Err(anyhow!("memory run log already finished"));
        }
        self.records
            .lock()
            .map_err(|_| anyhow!("memory run log lock poisoned"))?
            .push(*record);
        Ok(())
    }

    fn records_written(&self) -> u64 {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64
    }

    fn finish(&mut self) -> Result<()> {
        *self
            .finished
            .lock()
            .map_err(|_| anyhow!("memory run log lock poisoned"))? = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn annotated(index: u64) -> AnnotatedFrame {
        AnnotatedFrame::passthrough(&Frame::rgb(index, 1, 1, vec![1, 2, 3]).unwrap())
    }

    #[test]
    fn record_follows_snapshot_fields() {
        let snapshot = AggregateSnapshot {
            frame_index: 9,
            frames_processed: 8,
            detections_this_frame: 2,
            detections_total: 37,
            occupancy_percent: 7,
        };
        let record = LogRecord::from(&snapshot);
        assert_eq!(
            record,
            LogRecord {
                frame_index: 9,
                detections_this_frame: 2,
                detections_total: 37,
                occupancy_percent: 7,
            }
        );
    }

    #[test]
    fn memory_sink_shares_state_with_clones() {
        let encoder = MemoryEncoder::new();
        let log = MemoryRunLog::new();
        let mut sink = OutputSink::new(Box::new(encoder.clone()), Box::new(log.clone()));

        sink.append_frame(&annotated(1)).unwrap();
        sink.append_log_record(&LogRecord {
            frame_index: 1,
            detections_this_frame: 0,
            detections_total: 0,
            occupancy_percent: 0,
        })
        .unwrap();
        assert_eq!(sink.frames_written(), 1);
        assert_eq!(sink.records_written(), 1);

        sink.close().unwrap();
        assert_eq!(encoder.frame_indices(), vec![1]);
        assert_eq!(log.records().len(), 1);
        assert!(encoder.is_finished());
        assert!(log.is_finished());
    }

    #[test]
    fn finished_memory_encoder_rejects_frames() {
        let mut encoder = MemoryEncoder::new();
        encoder.finish().unwrap();
        assert!(encoder.append(&annotated(1)).is_err());
    }
}
