use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::display::DisplayAdapter;
use crate::frame::AnnotatedFrame;
use crate::stats::AggregateSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Live frame counter for a run. Call `ProgressDisplay::set_total` once the
    /// source frame count is known.
    pub fn progress(&self) -> ProgressDisplay {
        let bar = if self.pretty() {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{spinner} {pos} frames {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            bar
        } else {
            ProgressBar::hidden()
        };
        ProgressDisplay {
            bar,
            plain: !self.pretty(),
            last_plain_report: None,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Console display: frame position plus detection counters.
///
/// Without a terminal it prints one line every few seconds instead of drawing.
/// Clones share the same bar.
#[derive(Clone)]
pub struct ProgressDisplay {
    bar: ProgressBar,
    plain: bool,
    last_plain_report: Option<Instant>,
}

const PLAIN_REPORT_INTERVAL: Duration = Duration::from_secs(5);

impl ProgressDisplay {
    pub fn set_total(&self, total: Option<u64>) {
        if let (Some(total), false) = (total, self.plain) {
            self.bar.set_length(total);
            let style = ProgressStyle::with_template("{bar:30} {pos}/{len} frames {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            self.bar.set_style(style);
        }
    }

    pub fn finish(&self, summary: &str) {
        if self.plain {
            eprintln!("{summary}");
        } else {
            self.bar.finish_with_message(summary.to_string());
        }
    }
}

impl DisplayAdapter for ProgressDisplay {
    fn render(&mut self, frame: &AnnotatedFrame, snapshot: &AggregateSnapshot) {
        let message = counters(snapshot);
        if self.plain {
            let due = self
                .last_plain_report
                .map(|at| at.elapsed() >= PLAIN_REPORT_INTERVAL)
                .unwrap_or(true);
            if due {
                eprintln!("frame {}: {}", frame.index(), message);
                self.last_plain_report = Some(Instant::now());
            }
            return;
        }
        self.bar.set_position(frame.index());
        self.bar.set_message(message);
    }
}

fn counters(snapshot: &AggregateSnapshot) -> String {
    format!(
        "detections {} (total {}) occupancy {}%",
        snapshot.detections_this_frame, snapshot.detections_total, snapshot.occupancy_percent
    )
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn ui_flag_selects_mode() {
        assert_eq!(Ui::from_args(Some("plain"), true).mode, UiMode::Plain);
        assert_eq!(Ui::from_args(Some("pretty"), true).mode, UiMode::Pretty);
        assert_eq!(Ui::from_args(None, true).mode, UiMode::Auto);
        assert!(!Ui::from_args(Some("pretty"), false).pretty());
    }

    #[test]
    fn counters_show_snapshot_fields() {
        let snapshot = AggregateSnapshot {
            frame_index: 3,
            frames_processed: 3,
            detections_this_frame: 2,
            detections_total: 37,
            occupancy_percent: 7,
        };
        assert_eq!(counters(&snapshot), "detections 2 (total 37) occupancy 7%");
    }

    #[test]
    fn hidden_progress_accepts_updates() {
        let mut display = Ui::new(UiMode::Pretty, false).progress();
        display.set_total(Some(10));
        let frame = AnnotatedFrame::passthrough(&Frame::rgb(1, 1, 1, vec![0, 0, 0]).unwrap());
        display.render(&frame, &AggregateSnapshot::default());
        display.render(&frame, &AggregateSnapshot::default());
        assert!(display.last_plain_report.is_some());
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
