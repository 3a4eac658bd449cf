//! Host-side driver loop.
//!
//! `drive` is the external loop around `FramePipelineScheduler::step`: start, then
//! step until a terminal outcome, yielding to the host between steps.

use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::run::{PipelineRun, RunReport};
use crate::scheduler::{FramePipelineScheduler, StepOutcome};

/// How fast the driver pulls frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pacing {
    /// Step as fast as inference allows.
    #[default]
    Unthrottled,
    /// Keep steps at least one source frame interval apart.
    SourceRate,
}

impl std::str::FromStr for Pacing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unthrottled" => Ok(Self::Unthrottled),
            "source-rate" | "source_rate" => Ok(Self::SourceRate),
            other => Err(anyhow::anyhow!(
                "pacing must be 'unthrottled' or 'source-rate' (got '{}')",
                other
            )),
        }
    }
}

/// Step interval for a source frame rate. Non-positive rates are not paced.
pub fn frame_interval(frame_rate: f64) -> Option<Duration> {
    if frame_rate.is_finite() && frame_rate > 0.0 {
        Some(Duration::from_secs_f64(1.0 / frame_rate))
    } else {
        None
    }
}

/// Run `run` to completion.
///
/// `between_steps` is called after every non-terminal step; it is where the host
/// refreshes its UI or requests cancellation through the run's `CancelHandle`.
/// Returns `Err` only when the run cannot start; fatal faults during the run are
/// reported in the returned `RunReport`.
pub fn drive<F>(
    scheduler: &mut FramePipelineScheduler,
    run: &mut PipelineRun,
    pacing: Pacing,
    mut between_steps: F,
) -> Result<RunReport, PipelineError>
where
    F: FnMut(&PipelineRun),
{
    let info = scheduler.start(run)?;
    let interval = match pacing {
        Pacing::Unthrottled => None,
        Pacing::SourceRate => frame_interval(info.frame_rate),
    };

    loop {
        let began = Instant::now();
        match scheduler.step(run)? {
            StepOutcome::Continue => {}
            StepOutcome::Done(_) | StepOutcome::Cancelled(_) | StepOutcome::Failed(_) => break,
        }
        between_steps(run);
        if let Some(interval) = interval {
            let spent = began.elapsed();
            if spent < interval {
                std::thread::sleep(interval - spent);
            }
        }
    }
    Ok(run.report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubEngine;
    use crate::ingest::{SyntheticClip, SyntheticSource};
    use crate::run::RunState;
    use crate::sink::{MemoryEncoder, MemoryRunLog, OutputSink};

    fn run(clip: SyntheticClip) -> PipelineRun {
        PipelineRun::new(
            Box::new(SyntheticSource::new(clip)),
            OutputSink::new(Box::new(MemoryEncoder::new()), Box::new(MemoryRunLog::new())),
        )
    }

    #[test]
    fn drives_to_finished() {
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        let mut run = run(SyntheticClip::new(4).with_fault(2));
        let mut yields = 0;
        let report = drive(&mut scheduler, &mut run, Pacing::Unthrottled, |_| yields += 1).unwrap();
        assert_eq!(report.state, RunState::Finished);
        assert_eq!(report.snapshot.frames_processed, 3);
        assert_eq!(report.decode_faults.len(), 1);
        assert_eq!(yields, 4);
    }

    #[test]
    fn cancel_from_hook_is_observed_next_step() {
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        let mut run = run(SyntheticClip::new(10));
        let report = drive(&mut scheduler, &mut run, Pacing::Unthrottled, |run| {
            if run.snapshot().frames_processed == 2 {
                run.cancel_handle().cancel();
            }
        })
        .unwrap();
        assert_eq!(report.state, RunState::Cancelled);
        assert_eq!(report.snapshot.frames_processed, 2);
    }

    #[test]
    fn source_rate_pacing_spaces_steps() {
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        let mut clip = SyntheticClip::new(3).with_size(8, 8);
        clip.frame_rate = 50.0;
        let mut run = run(clip);
        let began = Instant::now();
        drive(&mut scheduler, &mut run, Pacing::SourceRate, |_| {}).unwrap();
        assert!(began.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn frame_interval_ignores_bad_rates() {
        assert_eq!(frame_interval(0.0), None);
        assert_eq!(frame_interval(f64::NAN), None);
        assert_eq!(frame_interval(25.0), Some(Duration::from_millis(40)));
    }

    #[test]
    fn parses_pacing() {
        assert_eq!("source-rate".parse::<Pacing>().unwrap(), Pacing::SourceRate);
        assert!("turbo".parse::<Pacing>().is_err());
    }
}
