//! C1: a single-shot, absolute-deadline timer with replace-on-reschedule semantics.
//!
//! Each [`Port`](crate::port::Port) owns one of these to drive its pending set: whenever
//! the earliest pending deadline changes, the port calls [`WaitTimer::start`] again, and
//! the previous deadline is simply discarded in favor of the new one.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;

struct State {
    /// The currently armed deadline, if any. `None` means no callback is scheduled.
    deadline: Option<Instant>,
    /// Bumped on every `start`/`cancel` so the worker thread can tell a reschedule from
    /// the deadline it already woke up to observe.
    generation: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
}

/// A single-shot timer. Construct with [`WaitTimer::new`], arm with [`WaitTimer::start`].
pub struct WaitTimer {
    shared: Arc<Shared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl WaitTimer {
    /// Fails only if the worker thread cannot be spawned (OS out of resources), matching
    /// the "fails if OS-level timer cannot be created" contract.
    pub fn new<F>(callback: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                deadline: None,
                generation: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("taskqueue-wait-timer".into())
            .spawn(move || run(&worker_shared, &callback))
            .map_err(|_| Error::Unexpected("failed to spawn wait timer thread"))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Replaces any prior deadline with `deadline`. If `deadline` is already in the past
    /// the callback fires promptly (on the worker thread, not synchronously here).
    pub fn start(&self, deadline: Instant) {
        let mut state = self.shared.state.lock();
        state.deadline = Some(deadline);
        state.generation = state.generation.wrapping_add(1);
        self.shared.condvar.notify_all();
    }

    /// Clears the armed deadline. An invocation already past the wait may still run to
    /// completion; no new invocation for the cleared deadline will occur.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        state.generation = state.generation.wrapping_add(1);
        self.shared.condvar.notify_all();
    }

    #[must_use]
    pub fn now_plus(ms: u64) -> Instant {
        Instant::now() + std::time::Duration::from_millis(ms)
    }
}

fn run(shared: &Arc<Shared>, callback: &dyn Fn()) {
    loop {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                None => {
                    shared.condvar.wait(&mut state);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let observed_generation = state.generation;
                    let timed_out = shared
                        .condvar
                        .wait_for(&mut state, deadline - now)
                        .timed_out();
                    if timed_out && state.generation == observed_generation {
                        break;
                    }
                    // Either rescheduled or spuriously woken; re-check from the top.
                }
            }
        }
        if state.shutdown {
            return;
        }
        // We are about to fire for this generation; clear the deadline so a concurrent
        // `start` racing in is not silently swallowed by us re-observing a stale value.
        let fired_generation = state.generation;
        state.deadline = None;
        drop(state);

        callback();

        // If nobody rescheduled while the callback ran, leave the timer disarmed.
        let mut state = shared.state.lock();
        if state.generation == fired_generation {
            state.deadline = None;
        }
        drop(state);
    }
}

impl Drop for WaitTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.generation = state.generation.wrapping_add(1);
            self.shared.condvar.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            // Joining blocks until any in-flight callback invocation has returned, per the
            // "must block until no callback is running" destruction contract.
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn fires_once_after_deadline() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let timer = WaitTimer::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        timer.start(WaitTimer::now_plus(30));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reschedule_replaces_prior_deadline() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let timer = WaitTimer::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        timer.start(WaitTimer::now_plus(500));
        timer.start(WaitTimer::now_plus(20));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_firing() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let timer = WaitTimer::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        timer.start(WaitTimer::now_plus(30));
        timer.cancel();
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn past_deadline_fires_promptly() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let timer = WaitTimer::new(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        timer.start(Instant::now() - Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
