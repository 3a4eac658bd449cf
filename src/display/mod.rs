//! Presentation side of a run.
//!
//! Two kinds of consumer hang off the scheduler:
//! - `DisplayAdapter`: gets the annotated frame plus the snapshot once per
//!   processed frame (image panel, counters)
//! - `RunObserver`: gets an immutable `RunEvent` broadcast per processed frame and
//!   once on the terminal transition (chart, host notifications)
//!
//! Consumers MUST NOT:
//! - Block the scheduler for longer than a frame budget (wrap slow displays in
//!   `CoalescingDisplay`)
//! - Expect every frame: display updates are best-effort

pub mod coalesce;
pub mod history;

pub use coalesce::CoalescingDisplay;
pub use history::{HistoryRecorder, SeriesPoint, SnapshotHistory};

use serde::Serialize;

use crate::frame::AnnotatedFrame;
use crate::run::RunState;
use crate::stats::AggregateSnapshot;

pub trait DisplayAdapter: Send {
    fn render(&mut self, frame: &AnnotatedFrame, snapshot: &AggregateSnapshot);
}

impl<F> DisplayAdapter for F
where
    F: FnMut(&AnnotatedFrame, &AggregateSnapshot) + Send,
{
    fn render(&mut self, frame: &AnnotatedFrame, snapshot: &AggregateSnapshot) {
        self(frame, snapshot)
    }
}

/// Notification broadcast to every subscribed observer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// A frame was fully processed and persisted.
    Frame { snapshot: AggregateSnapshot },
    /// The run reached a terminal state. Sent exactly once.
    Terminal {
        state: RunState,
        snapshot: AggregateSnapshot,
        reason: Option<String>,
        last_good_frame: Option<u64>,
    },
}

impl RunEvent {
    pub fn snapshot(&self) -> &AggregateSnapshot {
        match self {
            Self::Frame { snapshot } | Self::Terminal { snapshot, .. } => snapshot,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

pub trait RunObserver: Send {
    fn notify(&mut self, event: &RunEvent);
}

impl<F> RunObserver for F
where
    F: FnMut(&RunEvent) + Send,
{
    fn notify(&mut self, event: &RunEvent) {
        self(event)
    }
}
