//! Non-blocking display wrapper.
//!
//! `CoalescingDisplay` hands each update to a worker thread through a single-slot
//! mailbox. `render` never waits for the inner adapter: if the worker is still
//! busy, the pending update is replaced by the newer one and counted as dropped.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::DisplayAdapter;
use crate::frame::AnnotatedFrame;
use crate::stats::AggregateSnapshot;

type Update = (AnnotatedFrame, AggregateSnapshot);

#[derive(Default)]
struct Slot {
    pending: Option<Update>,
    closed: bool,
}

#[derive(Default)]
struct Mailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
    dropped: AtomicU64,
    rendered: AtomicU64,
}

pub struct CoalescingDisplay {
    mailbox: Arc<Mailbox>,
    worker: Option<JoinHandle<()>>,
}

impl CoalescingDisplay {
    pub fn spawn<D: DisplayAdapter + 'static>(mut inner: D) -> Result<Self> {
        let mailbox = Arc::new(Mailbox::default());
        let shared = Arc::clone(&mailbox);
        let worker = thread::Builder::new()
            .name("display".to_string())
            .spawn(move || loop {
                let update = {
                    let mut slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
                    while slot.pending.is_none() && !slot.closed {
                        slot = shared
                            .ready
                            .wait(slot)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    match slot.pending.take() {
                        Some(update) => update,
                        None => break,
                    }
                };
                inner.render(&update.0, &update.1);
                shared.rendered.fetch_add(1, Ordering::Relaxed);
            })
            .context("spawn display worker")?;
        Ok(Self {
            mailbox,
            worker: Some(worker),
        })
    }

    /// Updates replaced before the worker picked them up.
    pub fn dropped(&self) -> u64 {
        self.mailbox.dropped.load(Ordering::Relaxed)
    }

    pub fn rendered(&self) -> u64 {
        self.mailbox.rendered.load(Ordering::Relaxed)
    }

    /// Render whatever is pending, then stop the worker.
    pub fn shutdown(&mut self) {
        {
            let mut slot = self
                .mailbox
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slot.closed = true;
        }
        self.mailbox.ready.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("display worker panicked");
            }
        }
    }
}

impl DisplayAdapter for CoalescingDisplay {
    fn render(&mut self, frame: &AnnotatedFrame, snapshot: &AggregateSnapshot) {
        let mut slot = self
            .mailbox
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.closed {
            return;
        }
        if slot.pending.replace((frame.clone(), *snapshot)).is_some() {
            self.mailbox.dropped.fetch_add(1, Ordering::Relaxed);
        }
        drop(slot);
        self.mailbox.ready.notify_one();
    }
}

impl Drop for CoalescingDisplay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use std::sync::mpsc;
    use std::time::Duration;

    fn update(index: u64) -> (AnnotatedFrame, AggregateSnapshot) {
        let frame = Frame::rgb(index, 1, 1, vec![0, 0, 0]).unwrap();
        let snapshot = AggregateSnapshot {
            frame_index: index,
            frames_processed: index,
            ..AggregateSnapshot::default()
        };
        (AnnotatedFrame::passthrough(&frame), snapshot)
    }

    #[test]
    fn every_update_is_rendered_or_dropped() {
        let (tx, rx) = mpsc::channel();
        let mut display = CoalescingDisplay::spawn(
            move |frame: &AnnotatedFrame, _snap: &AggregateSnapshot| {
                thread::sleep(Duration::from_millis(5));
                let _ = tx.send(frame.index());
            },
        )
        .unwrap();

        for i in 1..=20 {
            let (frame, snap) = update(i);
            display.render(&frame, &snap);
        }
        display.shutdown();

        let seen: Vec<u64> = rx.try_iter().collect();
        assert_eq!(display.rendered() + display.dropped(), 20);
        assert_eq!(seen.len() as u64, display.rendered());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&20));
    }

    #[test]
    fn render_does_not_wait_for_slow_adapter() {
        let mut display = CoalescingDisplay::spawn(
            |_frame: &AnnotatedFrame, _snap: &AggregateSnapshot| {
                thread::sleep(Duration::from_millis(200));
            },
        )
        .unwrap();
        let start = std::time::Instant::now();
        for i in 1..=5 {
            let (frame, snap) = update(i);
            display.render(&frame, &snap);
        }
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn updates_after_shutdown_are_ignored() {
        let mut display =
            CoalescingDisplay::spawn(|_f: &AnnotatedFrame, _s: &AggregateSnapshot| {}).unwrap();
        display.shutdown();
        let (frame, snap) = update(1);
        display.render(&frame, &snap);
        assert_eq!(display.rendered(), 0);
    }
}
