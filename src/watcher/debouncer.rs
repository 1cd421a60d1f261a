//! Per-path debouncing of change events.
//!
//! Editors often save a file several times in quick succession (auto-save,
//! format-on-save). Each path gets one timer; a new event for the path resets
//! it, and only the last event is emitted once the path has been quiet for the
//! full interval. Timers live in a [`DelayQueue`] owned by the debouncer task,
//! so expiry is just another branch of the same `select!` loop.

use std::collections::HashMap;
use std::future::poll_fn;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

use super::ChangeEvent;
use crate::config::MAX_DEBOUNCE_MS;

/// Upper bound on the interval; the timer wheel rejects far-off deadlines.
const MAX_INTERVAL: Duration = Duration::from_millis(MAX_DEBOUNCE_MS as u64);

#[derive(Debug)]
struct PendingTimer {
    key: Key,
    last_event: ChangeEvent,
}

/// Debounces change events by path.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    /// Pending paths: path -> timer key and the latest event.
    pending: HashMap<PathBuf, PendingTimer>,
    timers: DelayQueue<PathBuf>,
}

impl Debouncer {
    /// With a zero interval every event expires on the next poll, so events
    /// pass straight through. Intervals above one day are clamped.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.min(MAX_INTERVAL),
            pending: HashMap::new(),
            timers: DelayQueue::new(),
        }
    }

    /// Record an event, starting or resetting the timer for its path.
    ///
    /// Must be called from within a tokio runtime.
    pub fn record(&mut self, event: ChangeEvent) {
        match self.pending.get_mut(&event.path) {
            Some(timer) => {
                self.timers.reset(&timer.key, self.interval);
                timer.last_event = event;
            }
            None => {
                let key = self.timers.insert(event.path.clone(), self.interval);
                self.pending.insert(
                    event.path.clone(),
                    PendingTimer {
                        key,
                        last_event: event,
                    },
                );
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run until cancelled, or until the input closes and every pending
    /// timer has fired. Nothing is emitted once `cancel` has fired.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<ChangeEvent>,
        output: mpsc::UnboundedSender<ChangeEvent>,
        cancel: CancellationToken,
    ) {
        let mut input_open = true;

        loop {
            if !input_open && !self.has_pending() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(expired) = poll_fn(|cx| self.timers.poll_expired(cx)), if self.has_pending() => {
                    let path = expired.into_inner();
                    let Some(timer) = self.pending.remove(&path) else {
                        continue;
                    };
                    if cancel.is_cancelled() || output.send(timer.last_event).is_err() {
                        break;
                    }
                }

                received = input.recv(), if input_open => match received {
                    Some(event) => self.record(event),
                    None => input_open = false,
                },
            }
        }

        if self.has_pending() {
            crate::debug_event!(
                "debounce",
                "discarded",
                "{} pending paths",
                self.pending_count()
            );
        }
        self.timers.clear();
        self.pending.clear();
    }
}
