//! C6: a per-call state machine that multiplexes opcode callbacks onto a [`TaskQueue`]'s
//! two ports.
//!
//! The provider function is a stateless `Fn`, not `FnMut`: any mutable state it needs
//! (iteration counters, partial buffers) lives behind its own interior mutability, which is
//! what lets [`AsyncOperation`] invoke it without holding any of its own locks across the
//! call — required because `Opcode::Cleanup` can be reentered from inside the user's
//! completion callback (see [`AsyncOperation::get_result`]).

use crate::error::{Error, Result};
use crate::task_queue::{PortKind, TaskQueue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

/// The opcode set a provider function is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Begin,
    DoWork,
    GetResult,
    Cancel,
    Cleanup,
}

/// Opaque identity tag compared by pointer equality between [`AsyncOperation::begin`] and
/// [`AsyncOperation::get_result`]. Construct a fresh one with [`IdentityToken::new`] per
/// logical caller; two tokens compare equal only if they are clones of the same one.
#[derive(Clone)]
pub struct IdentityToken(Arc<()>, &'static str);

impl IdentityToken {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self(Arc::new(()), name)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.1
    }
}

impl PartialEq for IdentityToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for IdentityToken {}

/// Outcome a `run`-style work closure returns from one `DoWork` invocation.
pub enum WorkOutcome {
    /// The operation is finished; carries the same payload [`AsyncOperation::complete`] does.
    Ready(Result<usize>),
    /// Not finished; reschedule another `DoWork` invocation after `delay_ms`.
    Pending { delay_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AsyncState {
    Initial,
    Scheduled,
    Pending,
    Canceled,
    Completed,
    ResultConsumed,
    CleanedUp,
}

type ProviderFn = Arc<dyn Fn(Opcode, &Arc<AsyncOperation>) -> Result<()> + Send + Sync>;

fn catch_provider(f: impl FnOnce() -> Result<()>) -> Result<()> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .unwrap_or(Err(Error::Unexpected("provider function panicked")))
}

/// A single in-flight async call. See the module docs and the state machine in the
/// operation design notes: `Initial -> Scheduled -> Pending -> Completed -> ResultConsumed
/// -> CleanedUp`, with a `Canceled` branch out of `Scheduled`/`Pending`.
pub struct AsyncOperation {
    queue: TaskQueue,
    state: Mutex<AsyncState>,
    identity: Mutex<Option<IdentityToken>>,
    provider_fn: Mutex<Option<ProviderFn>>,
    result: Mutex<Option<Result<usize>>>,
    completion_callback: Mutex<Option<Box<dyn FnOnce(Result<usize>) + Send>>>,
    done: crate::util::OnceEvent,
    generation: AtomicU64,
}

impl AsyncOperation {
    #[must_use]
    pub fn new(queue: TaskQueue) -> Arc<Self> {
        Arc::new(Self {
            queue,
            state: Mutex::new(AsyncState::Initial),
            identity: Mutex::new(None),
            provider_fn: Mutex::new(None),
            result: Mutex::new(None),
            completion_callback: Mutex::new(None),
            done: crate::util::OnceEvent::new(),
            generation: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Records identity, provider, and completion callback, then invokes `provider_fn` with
    /// [`Opcode::Begin`] synchronously on the calling thread. If it returns an error the
    /// operation completes directly with that error (the launch itself still reports `Ok`;
    /// the failure is observed through [`Self::get_status`]/the completion callback).
    pub fn begin<F, C>(self: &Arc<Self>, identity: IdentityToken, provider_fn: F, completion: C) -> Result<()>
    where
        F: Fn(Opcode, &Arc<AsyncOperation>) -> Result<()> + Send + Sync + 'static,
        C: FnOnce(Result<usize>) + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if *state != AsyncState::Initial {
                return Err(Error::InvalidArg);
            }
            *state = AsyncState::Scheduled;
        }
        *self.identity.lock() = Some(identity);
        let provider_fn: ProviderFn = Arc::new(provider_fn);
        *self.provider_fn.lock() = Some(provider_fn.clone());
        *self.completion_callback.lock() = Some(Box::new(completion));

        if let Err(e) = catch_provider(|| (*provider_fn)(Opcode::Begin, self)) {
            event!(Level::DEBUG, error = ?e, "async operation failed during Begin");
            self.complete(Err(e));
        }
        Ok(())
    }

    /// Moves the operation to `Scheduled` and submits one `DoWork` invocation to the Work
    /// port after `delay_ms`. Fails with [`Error::InvalidArg`] if the operation is not in
    /// `Scheduled` or `Pending` (e.g. already completed or canceled).
    pub fn schedule(self: &Arc<Self>, delay_ms: u64) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                AsyncState::Scheduled | AsyncState::Pending => *state = AsyncState::Scheduled,
                _ => return Err(Error::InvalidArg),
            }
        }

        let op = Arc::clone(self);
        let generation = self.generation.load(Ordering::Acquire);
        self.queue.submit_delayed(PortKind::Work, delay_ms, move |port_canceled| {
            if port_canceled {
                op.complete(Err(Error::Aborted));
                return;
            }
            if op.generation.load(Ordering::Acquire) != generation {
                // A newer schedule (or a cancel) superseded this invocation.
                return;
            }

            let proceed = {
                let mut state = op.state.lock();
                match *state {
                    AsyncState::Scheduled => {
                        *state = AsyncState::Pending;
                        true
                    }
                    _ => false,
                }
            };
            if !proceed {
                return;
            }

            let provider_fn = op.provider_fn.lock().clone();
            if let Some(provider_fn) = provider_fn {
                let _ = catch_provider(|| (*provider_fn)(Opcode::DoWork, &op));
            }
        })
    }

    /// Completes the operation with `result`, idempotently: once the operation has reached
    /// `Completed` or later, later calls are no-ops. Posts the user's completion callback to
    /// the Completion port; [`Self::get_status`] with `wait = true` unblocks only after that
    /// callback has returned.
    pub fn complete(self: &Arc<Self>, result: Result<usize>) {
        {
            let mut state = self.state.lock();
            if matches!(
                *state,
                AsyncState::Completed | AsyncState::ResultConsumed | AsyncState::CleanedUp
            ) {
                return;
            }
            *state = AsyncState::Completed;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.result.lock() = Some(result);

        let callback = self.completion_callback.lock().take();
        let Some(callback) = callback else {
            self.done.set();
            return;
        };

        let op = Arc::clone(self);
        // If the Completion port has already been torn down this drops `callback` unrun,
        // which only happens if the owning queue was terminated out from under a still
        // in-flight operation — a caller error, not a case this type can recover from.
        let _ = self.queue.submit(PortKind::Completion, move |_port_canceled| {
            callback(result);
            op.done.set();
        });
    }

    /// Returns the current status. With `wait = false`, [`Error::Pending`] if not yet
    /// completed. With `wait = true`, blocks until the completion callback has returned.
    pub fn get_status(&self, wait: bool) -> Result<()> {
        if wait {
            self.done.wait();
        } else {
            let state = self.state.lock();
            if !matches!(
                *state,
                AsyncState::Completed | AsyncState::ResultConsumed | AsyncState::CleanedUp
            ) {
                return Err(Error::Pending);
            }
        }
        match *self.result.lock() {
            Some(Ok(_)) | None => Ok(()),
            Some(Err(e)) => Err(e),
        }
    }

    /// Valid only once completed.
    pub fn get_result_size(&self) -> Result<usize> {
        match *self.result.lock() {
            Some(result) => result,
            None => Err(Error::Pending),
        }
    }

    /// Transitions to `ResultConsumed`, invokes `provider_fn(GetResult)`, then runs
    /// [`Self::run_cleanup`]. Fails with [`Error::InvalidArg`] if `identity` does not match
    /// the one supplied at [`Self::begin`], or if called before completion.
    pub fn get_result(self: &Arc<Self>, identity: &IdentityToken) -> Result<usize> {
        {
            let stored = self.identity.lock();
            match &*stored {
                Some(id) if id == identity => {}
                _ => return Err(Error::InvalidArg),
            }
        }

        let stored_result = {
            let mut state = self.state.lock();
            if *state != AsyncState::Completed {
                return Err(Error::InvalidArg);
            }
            *state = AsyncState::ResultConsumed;
            *self.result.lock()
        };

        if let Some(provider_fn) = self.provider_fn.lock().clone() {
            let _ = catch_provider(|| (*provider_fn)(Opcode::GetResult, self));
        }
        self.run_cleanup();

        stored_result.unwrap_or(Err(Error::Unexpected("completed operation has no stored result")))
    }

    /// Runs `provider_fn(Cleanup)` exactly once, idempotently. [`Self::get_result`] calls
    /// this for operations whose caller consumes the result directly; callers that only ever
    /// observe completion through the completion callback (never calling `get_result`) must
    /// call this themselves from inside that callback so `Cleanup` still fires — see
    /// `net_lifecycle`'s wrapped completion closures.
    pub(crate) fn run_cleanup(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state == AsyncState::CleanedUp {
                return;
            }
            *state = AsyncState::CleanedUp;
        }
        if let Some(provider_fn) = self.provider_fn.lock().clone() {
            let _ = catch_provider(|| (*provider_fn)(Opcode::Cleanup, self));
        }
    }

    /// Idempotent: a no-op once the operation is no longer `Scheduled`/`Pending`. Invokes
    /// `provider_fn(Cancel)`; the provider is expected to call [`Self::complete`] itself
    /// once its work has actually halted.
    pub fn cancel(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            match *state {
                AsyncState::Scheduled | AsyncState::Pending => *state = AsyncState::Canceled,
                _ => return,
            }
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(provider_fn) = self.provider_fn.lock().clone() {
            let _ = catch_provider(|| (*provider_fn)(Opcode::Cancel, self));
        }
    }
}

/// Convenience launcher: begins an operation whose provider is driven entirely by
/// `work_fn`, then submits the first `DoWork` invocation immediately. `work_fn` is called
/// once per `DoWork` opcode and decides whether the operation is done.
pub fn run<F, C>(queue: TaskQueue, identity: IdentityToken, work_fn: F, completion: C) -> Result<Arc<AsyncOperation>>
where
    F: FnMut(&Arc<AsyncOperation>) -> WorkOutcome + Send + 'static,
    C: FnOnce(Result<usize>) + Send + 'static,
{
    let work_fn = Mutex::new(work_fn);
    let op = AsyncOperation::new(queue);

    let provider = move |opcode: Opcode, op: &Arc<AsyncOperation>| -> Result<()> {
        match opcode {
            Opcode::Begin => Ok(()),
            Opcode::DoWork => match (*work_fn.lock())(op) {
                WorkOutcome::Ready(result) => {
                    op.complete(result);
                    Ok(())
                }
                WorkOutcome::Pending { delay_ms } => op.schedule(delay_ms),
            },
            Opcode::Cancel => {
                op.complete(Err(Error::Aborted));
                Ok(())
            }
            Opcode::GetResult | Opcode::Cleanup => Ok(()),
        }
    };

    op.begin(identity, provider, completion)?;
    op.schedule(0)?;
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskQueueConfig;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn run_completes_with_work_fn_result() {
        let queue = TaskQueue::create(TaskQueueConfig::default(), true, true).unwrap();
        let (tx, rx) = mpsc::channel();
        let mut calls = 0u32;
        let op = run(
            queue,
            IdentityToken::new("test"),
            move |_op| {
                calls += 1;
                if calls >= 3 {
                    WorkOutcome::Ready(Ok(calls as usize))
                } else {
                    WorkOutcome::Pending { delay_ms: 10 }
                }
            },
            move |result| tx.send(result).unwrap(),
        )
        .unwrap();

        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result, Ok(3));
        op.get_status(true).unwrap();
    }

    #[test]
    fn get_result_rejects_mismatched_identity() {
        let queue = TaskQueue::create(TaskQueueConfig::default(), true, true).unwrap();
        let (tx, rx) = mpsc::channel();
        let op = run(
            queue,
            IdentityToken::new("owner"),
            |_op| WorkOutcome::Ready(Ok(7)),
            move |_result| tx.send(()).unwrap(),
        )
        .unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        let wrong = IdentityToken::new("impostor");
        assert_eq!(op.get_result(&wrong).unwrap_err(), Error::InvalidArg);
    }

    #[test]
    fn cancel_completes_with_aborted() {
        let queue = TaskQueue::create(TaskQueueConfig::default(), true, true).unwrap();
        let (tx, rx) = mpsc::channel();
        let op = run(
            queue,
            IdentityToken::new("test"),
            |_op| WorkOutcome::Pending { delay_ms: 500 },
            move |result| tx.send(result).unwrap(),
        )
        .unwrap();

        op.cancel();
        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, Err(Error::Aborted));
    }
}
