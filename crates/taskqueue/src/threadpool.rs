//! C2: a fixed-capacity worker pool.
//!
//! [`Port`](crate::port::Port) uses one of these for its `ThreadPool` and
//! `SerializedThreadPool` dispatch policies (the latter additionally serializes
//! invocations with a single-entry ticket on top of this pool).

use negative_impl::negative_impl;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{event, Level};

type Job = Box<dyn FnOnce(CallbackInstance) + Send>;

struct State {
    jobs: VecDeque<Job>,
    accepting: bool,
    /// Jobs queued plus jobs currently executing. `terminate` waits for this to hit zero.
    outstanding: usize,
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
}

/// A pool of OS threads draining a shared job queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl ThreadPool {
    #[must_use]
    pub fn new(worker_count: usize, name: &str) -> Self {
        assert!(worker_count > 0, "a thread pool needs at least one worker");

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                accepting: true,
                outstanding: 0,
            }),
            condvar: Condvar::new(),
        });

        let workers = (0..worker_count)
            .map(|i| {
                let worker_shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || worker_loop(&worker_shared))
                    .expect("spawning a thread pool worker should never fail unless the OS is critically out of resources")
            })
            .collect();

        Self { shared, workers }
    }

    /// Enqueues one callback invocation. Returns `false` if the pool is terminating and
    /// the job was rejected.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce(CallbackInstance) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            return false;
        }
        state.outstanding += 1;
        state.jobs.push_back(Box::new(job));
        self.shared.condvar.notify_all();
        true
    }

    /// Prevents new submissions and blocks until every queued and in-flight invocation has
    /// returned (or marked itself complete via [`CallbackInstance::mark_complete`]).
    pub fn terminate(&self) {
        let mut state = self.shared.state.lock();
        state.accepting = false;
        self.shared.condvar.notify_all();
        while state.outstanding > 0 {
            self.shared.condvar.wait(&mut state);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.terminate();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break Some(job);
                }
                if !state.accepting {
                    break None;
                }
                shared.condvar.wait(&mut state);
            }
        };

        let Some(job) = job else { return };

        let instance = CallbackInstance::new(Arc::clone(shared));
        job(instance);
        // `instance`'s Drop marks the slot complete if the callback did not already do so.
    }
}

/// A handle passed into every pool callback invocation.
///
/// Dropping it (including implicitly, when the callback returns) marks the invocation
/// complete unless [`CallbackInstance::mark_complete`] was already called explicitly. Calling
/// it early lets a callback release the pool's bookkeeping for itself *before* it finishes
/// unwinding, which is what allows a callback to close its own owning task queue without
/// deadlocking on [`ThreadPool::terminate`] waiting for itself to return.
pub struct CallbackInstance {
    shared: Option<Arc<Shared>>,
}

impl CallbackInstance {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    /// Marks this invocation complete for the purposes of [`ThreadPool::terminate`]
    /// accounting. Safe to call at most meaningfully once; later calls are no-ops.
    pub fn mark_complete(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut state = shared.state.lock();
            state.outstanding -= 1;
            shared.condvar.notify_all();
        }
    }

    /// Hints that this invocation may run for a long time. Informational only (surfaced via
    /// tracing); the pool does not currently use it to grow capacity.
    pub fn hint_may_run_long(&self) {
        event!(Level::TRACE, "thread pool callback hinted a long-running invocation");
    }
}

impl Drop for CallbackInstance {
    fn drop(&mut self) {
        self.mark_complete();
    }
}

#[negative_impl]
impl !Send for CallbackInstance {}
#[negative_impl]
impl !Sync for CallbackInstance {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let pool = ThreadPool::new(4, "test-pool");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let count = Arc::clone(&count);
            assert!(pool.submit(move |_instance| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.terminate();
        assert_eq!(count.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn terminate_rejects_new_submissions() {
        let pool = ThreadPool::new(2, "test-pool");
        pool.terminate();
        assert!(!pool.submit(|_instance| {}));
    }

    #[test]
    fn mark_complete_lets_pool_drain_before_callback_unwinds() {
        let pool = Arc::new(ThreadPool::new(1, "test-pool"));
        let pool2 = Arc::clone(&pool);
        let (tx, rx) = std::sync::mpsc::channel();
        pool.submit(move |mut instance| {
            instance.mark_complete();
            // At this point `terminate` on another thread can observe outstanding == 0
            // even though this closure (and the Arc<ThreadPool> it captured) has not
            // finished executing yet.
            drop(pool2);
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        pool.terminate();
    }
}
