//! Time series of run snapshots, the model behind the occupancy chart.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::{RunEvent, RunObserver};
use crate::stats::AggregateSnapshot;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SeriesPoint {
    pub frame_index: u64,
    pub detections_this_frame: u64,
    pub detections_total: u64,
    pub occupancy_percent: u8,
}

impl From<&AggregateSnapshot> for SeriesPoint {
    fn from(snapshot: &AggregateSnapshot) -> Self {
        Self {
            frame_index: snapshot.frame_index,
            detections_this_frame: snapshot.detections_this_frame,
            detections_total: snapshot.detections_total,
            occupancy_percent: snapshot.occupancy_percent,
        }
    }
}

/// Bounded history; the oldest points are evicted first.
#[derive(Clone, Debug)]
pub struct SnapshotHistory {
    capacity: usize,
    points: VecDeque<SeriesPoint>,
    evicted: u64,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity.min(1024)),
            evicted: 0,
        }
    }

    pub fn push(&mut self, snapshot: &AggregateSnapshot) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
            self.evicted += 1;
        }
        self.points.push_back(SeriesPoint::from(snapshot));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn points(&self) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter()
    }

    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.back()
    }

    /// `(frame_index, occupancy_percent)` pairs, ready to plot.
    pub fn occupancy_series(&self) -> Vec<(u64, u8)> {
        self.points
            .iter()
            .map(|p| (p.frame_index, p.occupancy_percent))
            .collect()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.evicted = 0;
    }
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Observer that appends every per-frame snapshot to a shared history. Clones
/// share the history, so the host keeps one clone and subscribes the other.
#[derive(Clone, Default)]
pub struct HistoryRecorder {
    history: Arc<Mutex<SnapshotHistory>>,
}

impl HistoryRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Arc::new(Mutex::new(SnapshotHistory::new(capacity))),
        }
    }

    /// Copy of the current history.
    pub fn history(&self) -> SnapshotHistory {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RunObserver for HistoryRecorder {
    fn notify(&mut self, event: &RunEvent) {
        if let RunEvent::Frame { snapshot } = event {
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(snapshot);
        }
    }
}
