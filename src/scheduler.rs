//! Frame pipeline scheduler.
//!
//! Drives one `PipelineRun` through
//! source -> inference -> stats -> sink -> display, exactly one frame per `step`.
//! The host owns the loop (see `driver`), so the scheduler never recurses, never
//! spawns, and is only ever blocked inside the inference call.
//!
//! Per processed frame, in this order:
//! 1. run inference and validate the result
//! 2. fold the detections into a staged copy of the statistics
//! 3. append the annotated frame, then the log record
//! 4. commit the staged statistics
//! 5. render and broadcast the snapshot
//!
//! The scheduler MUST NOT:
//! - Pull the next frame before the current record is persisted
//! - Roll back output already written when a run fails
//! - Emit per-frame events after the terminal event

use crate::detect::InferenceEngine;
use crate::display::{DisplayAdapter, RunEvent, RunObserver};
use crate::error::{reason, PipelineError};
use crate::frame::Frame;
use crate::ingest::{NextFrame, StreamInfo};
use crate::run::{PipelineRun, RunFailure, RunState};
use crate::sink::LogRecord;
use crate::stats::AggregateSnapshot;

/// Default interval, in processed frames, between progress log lines.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

/// What a single `step` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// A frame was processed or skipped; call `step` again.
    Continue,
    /// End of stream. The run is `Finished`.
    Done(AggregateSnapshot),
    /// A cancel request was observed. The run is `Cancelled`.
    Cancelled(AggregateSnapshot),
    /// A fatal fault ended the run. Output written so far is kept.
    Failed(RunFailure),
}

impl StepOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

pub struct FramePipelineScheduler {
    engine: Box<dyn InferenceEngine>,
    display: Option<Box<dyn DisplayAdapter>>,
    observers: Vec<Box<dyn RunObserver>>,
    progress_every: u64,
}

impl FramePipelineScheduler {
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            display: None,
            observers: Vec::new(),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    pub fn with_display<D: DisplayAdapter + 'static>(mut self, display: D) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    /// Log a progress line every `frames` processed frames (0 disables).
    pub fn with_progress_every(mut self, frames: u64) -> Self {
        self.progress_every = frames;
        self
    }

    pub fn subscribe<O: RunObserver + 'static>(&mut self, observer: O) {
        self.observers.push(Box::new(observer));
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Open the source, then the sink, and move the run to `Running`.
    ///
    /// A source or sink that cannot be opened sends the run straight to `Failed`;
    /// it never enters `Running`. The sink is not opened at all when the source
    /// fails, so earlier output files stay as they were.
    pub fn start(&mut self, run: &mut PipelineRun) -> Result<StreamInfo, PipelineError> {
        if run.state() != RunState::Idle {
            return Err(PipelineError::Lifecycle {
                operation: "start",
                state: run.state(),
            });
        }
        run.reset_stats();

        let opened = match run.source_mut() {
            Some(source) => {
                let described = source.describe();
                source.open().map(|info| (described, info))
            }
            None => Err(anyhow::anyhow!("source already released")),
        };
        let (described, info) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                let error = PipelineError::SourceUnavailable {
                    frame_index: None,
                    reason: reason(&e),
                };
                log::error!("run start failed: {}", error);
                self.fail(run, error.clone());
                return Err(error);
            }
        };

        let sink_opened = match run.sink_mut() {
            Some(sink) => sink.open(&info),
            None => Err(anyhow::anyhow!("sink already released")),
        };
        if let Err(e) = sink_opened {
            let error = PipelineError::SinkUnavailable { reason: reason(&e) };
            log::error!("run start failed: {}", error);
            self.fail(run, error.clone());
            return Err(error);
        }

        run.set_stream(info);
        run.set_state(RunState::Running);
        log::info!(
            "run started: source={} engine={} {}x{} @ {:.2} fps{}",
            described,
            self.engine.name(),
            info.width,
            info.height,
            info.frame_rate,
            info.total_frames
                .map(|n| format!(" ({} frames)", n))
                .unwrap_or_default()
        );
        Ok(info)
    }

    /// Pull and process exactly one frame.
    pub fn step(&mut self, run: &mut PipelineRun) -> Result<StepOutcome, PipelineError> {
        if run.state() != RunState::Running {
            return Err(PipelineError::Lifecycle {
                operation: "step",
                state: run.state(),
            });
        }
        if run.cancel_handle().is_cancelled() {
            self.cancel(run);
            return Ok(StepOutcome::Cancelled(run.snapshot()));
        }

        let next = match run.source_mut() {
            Some(source) => source.next_frame(),
            None => Err(anyhow::anyhow!("source already released")),
        };
        match next {
            Ok(NextFrame::Frame(frame)) => Ok(self.process(run, frame)),
            Ok(NextFrame::DecodeFault {
                frame_index,
                reason,
            }) => {
                let fault = PipelineError::DecodeFault {
                    frame_index,
                    reason,
                };
                log::warn!("skipping frame: {}", fault);
                run.record_decode_fault(fault);
                Ok(StepOutcome::Continue)
            }
            Ok(NextFrame::EndOfStream) => Ok(self.finish(run)),
            Err(e) => {
                let error = PipelineError::SourceUnavailable {
                    frame_index: Some(next_index(run)),
                    reason: reason(&e),
                };
                Ok(StepOutcome::Failed(self.fail(run, error)))
            }
        }
    }

    /// Stop the run at the current step boundary. No-op on a terminal run.
    pub fn cancel(&mut self, run: &mut PipelineRun) -> RunState {
        run.cancel_handle().cancel();
        if run.state().is_terminal() {
            return run.state();
        }
        if let Err(e) = run.release() {
            log::warn!("closing output after cancel failed: {:#}", e);
        }
        run.set_state(RunState::Cancelled);
        let snapshot = run.snapshot();
        log::info!(
            "run cancelled after {} frames ({} detections)",
            snapshot.frames_processed,
            snapshot.detections_total
        );
        self.broadcast(&RunEvent::Terminal {
            state: RunState::Cancelled,
            snapshot,
            reason: None,
            last_good_frame: run.last_good_frame(),
        });
        RunState::Cancelled
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn process(&mut self, run: &mut PipelineRun, frame: Frame) -> StepOutcome {
        let index = frame.index();

        let inference = match self
            .engine
            .infer(&frame)
            .and_then(|inference| inference.validate_for(&frame).map(|_| inference))
        {
            Ok(inference) => inference,
            Err(e) => {
                let error = PipelineError::Inference {
                    frame_index: index,
                    reason: reason(&e),
                };
                return StepOutcome::Failed(self.fail(run, error));
            }
        };

        let mut staged = *run.stats();
        let snapshot = staged.update(index, &inference.detections);

        let written = match run.sink_mut() {
            Some(sink) => sink
                .append_frame(&inference.annotated)
                .map_err(|e| PipelineError::Encode {
                    frame_index: index,
                    reason: reason(&e),
                })
                .and_then(|_| {
                    sink.append_log_record(&LogRecord::from(&snapshot))
                        .map_err(|e| PipelineError::Log {
                            frame_index: index,
                            reason: reason(&e),
                        })
                }),
            None => Err(PipelineError::SinkUnavailable {
                reason: "sink already released".to_string(),
            }),
        };
        if let Err(error) = written {
            return StepOutcome::Failed(self.fail(run, error));
        }
        run.commit_stats(staged);

        if let Some(display) = self.display.as_mut() {
            display.render(&inference.annotated, &snapshot);
        }
        self.broadcast(&RunEvent::Frame { snapshot });

        log::debug!(
            "frame {}: {} detections (total {}, occupancy {}%)",
            index,
            snapshot.detections_this_frame,
            snapshot.detections_total,
            snapshot.occupancy_percent
        );
        if self.progress_every > 0 && snapshot.frames_processed % self.progress_every == 0 {
            log::info!(
                "processed {} frames, {} detections, occupancy {}%",
                snapshot.frames_processed,
                snapshot.detections_total,
                snapshot.occupancy_percent
            );
        }
        StepOutcome::Continue
    }

    fn finish(&mut self, run: &mut PipelineRun) -> StepOutcome {
        if let Err(e) = run.release() {
            let error = PipelineError::SinkUnavailable { reason: reason(&e) };
            return StepOutcome::Failed(self.fail(run, error));
        }
        run.set_state(RunState::Finished);
        let snapshot = run.snapshot();
        log::info!(
            "run finished: {} frames, {} detections, occupancy {}%, {} decode faults",
            snapshot.frames_processed,
            snapshot.detections_total,
            snapshot.occupancy_percent,
            run.decode_faults().len()
        );
        self.broadcast(&RunEvent::Terminal {
            state: RunState::Finished,
            snapshot,
            reason: None,
            last_good_frame: run.last_good_frame(),
        });
        StepOutcome::Done(snapshot)
    }

    fn fail(&mut self, run: &mut PipelineRun, error: PipelineError) -> RunFailure {
        if let Err(e) = run.release() {
            log::warn!("closing output after failure failed: {:#}", e);
        }
        let failure = RunFailure {
            error,
            last_good_frame: run.last_good_frame(),
        };
        log::error!("run failed: {}", failure);
        run.set_state(RunState::Failed);
        run.set_failure(failure.clone());
        self.broadcast(&RunEvent::Terminal {
            state: RunState::Failed,
            snapshot: run.snapshot(),
            reason: Some(failure.error.to_string()),
            last_good_frame: failure.last_good_frame,
        });
        failure
    }

    fn broadcast(&mut self, event: &RunEvent) {
        for observer in self.observers.iter_mut() {
            observer.notify(event);
        }
    }
}

/// Index the source was expected to produce next.
fn next_index(run: &PipelineRun) -> u64 {
    let processed = run.snapshot().frame_index;
    let faulted = run
        .decode_faults()
        .last()
        .map(|fault| fault.frame_index)
        .unwrap_or(0);
    processed.max(faulted) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubEngine;
    use crate::ingest::{SyntheticClip, SyntheticSource};
    use crate::sink::{MemoryEncoder, MemoryRunLog, OutputSink};
    use std::sync::{Arc, Mutex};

    fn run_over(clip: SyntheticClip) -> (PipelineRun, MemoryEncoder, MemoryRunLog) {
        let encoder = MemoryEncoder::new();
        let log = MemoryRunLog::new();
        let run = PipelineRun::new(
            Box::new(SyntheticSource::new(clip)),
            OutputSink::new(Box::new(encoder.clone()), Box::new(log.clone())),
        );
        (run, encoder, log)
    }

    fn drain(scheduler: &mut FramePipelineScheduler, run: &mut PipelineRun) -> StepOutcome {
        loop {
            let outcome = scheduler.step(run).unwrap();
            if outcome.is_terminal() {
                return outcome;
            }
        }
    }

    #[test]
    fn processes_every_frame_and_finishes() {
        let (mut run, encoder, log) = run_over(SyntheticClip::new(6));
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        let info = scheduler.start(&mut run).unwrap();
        assert_eq!(info.total_frames, Some(6));
        assert_eq!(run.state(), RunState::Running);

        let outcome = drain(&mut scheduler, &mut run);
        let snapshot = run.snapshot();
        assert_eq!(outcome, StepOutcome::Done(snapshot));
        assert_eq!(run.state(), RunState::Finished);
        assert_eq!(snapshot.frames_processed, 6);
        assert_eq!(encoder.frame_indices(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(log.records().last().copied(), Some(LogRecord::from(&snapshot)));
        assert!(encoder.is_finished() && log.is_finished());
        assert!(!run.holds_resources());
    }

    #[test]
    fn step_requires_running_state() {
        let (mut run, _, _) = run_over(SyntheticClip::new(1));
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        let err = scheduler.step(&mut run).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Lifecycle {
                operation: "step",
                state: RunState::Idle
            }
        );
    }

    #[test]
    fn unopenable_source_fails_without_running() {
        let mut clip = SyntheticClip::new(3);
        clip.fail_open = true;
        let (mut run, encoder, _) = run_over(clip);
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        let err = scheduler.start(&mut run).unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable { frame_index: None, .. }));
        assert_eq!(run.state(), RunState::Failed);
        assert!(encoder.is_finished());
        assert!(!run.holds_resources());
    }

    #[test]
    fn unopenable_sink_fails_without_running() {
        struct Unopenable;
        impl crate::sink::FrameEncoder for Unopenable {
            fn open(&mut self, _stream: &StreamInfo) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("disk full"))
            }
            fn append(&mut self, _frame: &crate::frame::AnnotatedFrame) -> anyhow::Result<()> {
                Ok(())
            }
            fn frames_written(&self) -> u64 {
                0
            }
            fn finish(&mut self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let mut run = PipelineRun::new(
            Box::new(SyntheticSource::new(SyntheticClip::new(3))),
            OutputSink::new(Box::new(Unopenable), Box::new(MemoryRunLog::new())),
        );
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        let err = scheduler.start(&mut run).unwrap_err();
        assert!(matches!(err, PipelineError::SinkUnavailable { ref reason } if reason.contains("disk full")));
        assert_eq!(run.state(), RunState::Failed);
        assert!(!run.holds_resources());
    }

    #[test]
    fn decode_faults_are_recorded_and_skipped() {
        let (mut run, encoder, _) = run_over(SyntheticClip::new(4).with_fault(2));
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        scheduler.start(&mut run).unwrap();
        drain(&mut scheduler, &mut run);

        assert_eq!(encoder.frame_indices(), vec![1, 3, 4]);
        let faults = run.decode_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].frame_index, 2);
        let error = PipelineError::from(&faults[0]);
        assert_eq!(error.frame_index(), Some(2));
        assert!(error.to_string().starts_with("decode fault on frame 2"));
    }

    #[test]
    fn hard_read_error_mid_run_is_fatal() {
        let mut clip = SyntheticClip::new(5);
        clip.unreadable_at = Some(3);
        let (mut run, encoder, _) = run_over(clip);
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        scheduler.start(&mut run).unwrap();
        match drain(&mut scheduler, &mut run) {
            StepOutcome::Failed(failure) => {
                assert_eq!(failure.error.frame_index(), Some(3));
                assert_eq!(failure.last_good_frame, Some(2));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(encoder.frame_indices(), vec![1, 2]);
    }

    #[test]
    fn cancel_is_idempotent_and_notifies_once() {
        let (mut run, _, _) = run_over(SyntheticClip::new(4));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new()));
        scheduler.subscribe(move |event: &RunEvent| sink.lock().unwrap().push(event.clone()));

        scheduler.start(&mut run).unwrap();
        scheduler.step(&mut run).unwrap();
        assert_eq!(scheduler.cancel(&mut run), RunState::Cancelled);
        assert_eq!(scheduler.cancel(&mut run), RunState::Cancelled);

        let events = events.lock().unwrap();
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn display_sees_each_processed_frame() {
        let (mut run, _, _) = run_over(SyntheticClip::new(3).with_fault(2));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut scheduler = FramePipelineScheduler::new(Box::new(StubEngine::new())).with_display(
            move |frame: &crate::frame::AnnotatedFrame, snap: &AggregateSnapshot| {
                sink.lock().unwrap().push((frame.index(), snap.frames_processed));
            },
        );
        scheduler.start(&mut run).unwrap();
        drain(&mut scheduler, &mut run);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1), (3, 2)]);
    }
}
