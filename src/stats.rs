//! Running statistics for a pipeline run.
//!
//! `StatsAggregator` folds one frame's detections at a time into an
//! `AggregateSnapshot`. Readers only ever get copies of the snapshot.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::num::NonZeroU64;

use crate::frame::Detection;

/// Detections per occupancy percentage point.
pub const DEFAULT_OCCUPANCY_DIVISOR: u64 = 5;

/// Copy of the run statistics after the most recently completed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
    /// Sequence index of the most recently completed frame (0 before the first).
    pub frame_index: u64,
    pub frames_processed: u64,
    pub detections_this_frame: u64,
    /// Never decreases within a run.
    pub detections_total: u64,
    /// `min(100, detections_total / divisor)`.
    pub occupancy_percent: u8,
}

/// Maps cumulative detections to an occupancy percentage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OccupancyScale {
    divisor: NonZeroU64,
}

impl OccupancyScale {
    pub fn new(divisor: u64) -> Result<Self> {
        let divisor =
            NonZeroU64::new(divisor).ok_or_else(|| anyhow!("occupancy divisor must be > 0"))?;
        Ok(Self { divisor })
    }

    pub fn divisor(&self) -> u64 {
        self.divisor.get()
    }

    /// Integer floor division clamped at 100.
    pub fn percent(&self, detections_total: u64) -> u8 {
        (detections_total / self.divisor.get()).min(100) as u8
    }
}

impl Default for OccupancyScale {
    fn default() -> Self {
        Self {
            divisor: NonZeroU64::new(DEFAULT_OCCUPANCY_DIVISOR).unwrap_or(NonZeroU64::MIN),
        }
    }
}

/// Folds per-frame detections into the live snapshot.
///
/// Calls must be made in frame order. The aggregator is `Copy` so the scheduler can
/// stage an update and only commit it once the frame has been written out.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatsAggregator {
    scale: OccupancyScale,
    snapshot: AggregateSnapshot,
}

impl StatsAggregator {
    pub fn new(scale: OccupancyScale) -> Self {
        Self {
            scale,
            snapshot: AggregateSnapshot::default(),
        }
    }

    pub fn scale(&self) -> OccupancyScale {
        self.scale
    }

    pub fn reset(&mut self) {
        self.snapshot = AggregateSnapshot::default();
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        self.snapshot
    }

    pub fn update(&mut self, frame_index: u64, detections: &[Detection]) -> AggregateSnapshot {
        let count = detections.len() as u64;
        let snap = &mut self.snapshot;
        snap.frame_index = frame_index;
        snap.frames_processed += 1;
        snap.detections_this_frame = count;
        snap.detections_total = snap.detections_total.saturating_add(count);
        snap.occupancy_percent = self.scale.percent(snap.detections_total);
        *snap
    }
}
