//! Bounded-latency inference.
//!
//! `DeadlineEngine` moves an engine onto its own worker thread and waits at most
//! `timeout` for each result. An expired call is reported as an inference error.
//! The worker may still be busy with the stale frame, so after an expiry the
//! engine refuses further calls and the worker is detached instead of joined.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::backend::InferenceEngine;
use super::result::Inference;
use crate::frame::Frame;

pub struct DeadlineEngine {
    name: &'static str,
    timeout: Duration,
    requests: Option<Sender<Frame>>,
    responses: Receiver<Result<Inference>>,
    worker: Option<JoinHandle<()>>,
    expired: bool,
}

impl DeadlineEngine {
    /// Warm the engine up on the calling thread, then hand it to a worker.
    pub fn spawn<E: InferenceEngine + 'static>(mut engine: E, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(anyhow!("inference timeout must be greater than zero"));
        }
        engine.warm_up().context("engine warm-up failed")?;

        let name = engine.name();
        let (request_tx, request_rx) = mpsc::channel::<Frame>();
        let (response_tx, response_rx) = mpsc::channel::<Result<Inference>>();
        let worker = thread::Builder::new()
            .name(format!("infer-{}", name))
            .spawn(move || {
                while let Ok(frame) = request_rx.recv() {
                    let result = engine.infer(&frame);
                    if response_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .context("spawn inference worker")?;

        Ok(Self {
            name,
            timeout,
            requests: Some(request_tx),
            responses: response_rx,
            worker: Some(worker),
            expired: false,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl InferenceEngine for DeadlineEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    fn infer(&mut self, frame: &Frame) -> Result<Inference> {
        if self.expired {
            return Err(anyhow!(
                "{} engine unavailable after an earlier timeout",
                self.name
            ));
        }
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| anyhow!("{} engine worker already shut down", self.name))?;
        requests
            .send(frame.clone())
            .map_err(|_| anyhow!("{} engine worker exited", self.name))?;

        match self.responses.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.expired = true;
                Err(anyhow!(
                    "{} engine exceeded {} ms timeout",
                    self.name,
                    self.timeout.as_millis()
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("{} engine worker crashed", self.name))
            }
        }
    }
}

impl Drop for DeadlineEngine {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            if self.expired {
                log::warn!("detaching stalled {} inference worker", self.name);
            } else if worker.join().is_err() {
                log::warn!("{} inference worker panicked", self.name);
            }
        }
    }
}
