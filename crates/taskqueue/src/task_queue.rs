//! C5: a reference-counted pair of ports (Work, Completion) plus the bookkeeping that sits
//! above a single [`Port`]: a monitor registry notified on every submission, a queue-scoped
//! waiter registry, and cross-port termination sequencing.
//!
//! A queue either *owns* its two ports (created via [`TaskQueue::create`]) or is a
//! *composite* attached to ports owned by other queues (created via
//! [`TaskQueue::create_composite`]). Both forward `submit`/`register_waiter`/etc. through
//! the same [`Port`] API; only `terminate` behaves differently, per the composite
//! termination rule (see [`Port::terminate_context`]).

use crate::config::TaskQueueConfig;
use crate::error::{Error, Result};
use crate::port::{DispatchPolicy, Port, PortContext, WaiterToken};
use crate::threadpool::ThreadPool;
use crate::util::IdGenerator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{event, Level};

/// Selects one of a queue's two ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Work,
    Completion,
}

/// Queue-scoped token returned by [`TaskQueue::register_waiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueWaiterToken(u64);

/// Queue-scoped token returned by [`TaskQueue::register_monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorToken(u64);

struct PortBinding {
    port: Arc<Port>,
    /// `0` if this queue owns the port outright; otherwise the context minted by
    /// [`Port::attach`] for a composite queue.
    context: PortContext,
}

struct Inner {
    work: PortBinding,
    completion: PortBinding,
    /// `None` for a composite queue, which does not own the pool(s) backing its ports.
    _pool: Option<Arc<ThreadPool>>,
    monitors: Mutex<HashMap<u64, Box<dyn Fn(PortKind) + Send + Sync>>>,
    waiters: Mutex<HashMap<u64, (PortKind, WaiterToken)>>,
    ids: IdGenerator,
    allow_terminate: bool,
    allow_close: bool,
    closed: AtomicBool,
}

/// A reference-counted handle to a task queue. Cloning shares the same underlying queue
/// (Rust's `Arc` already gives the "shared handle" refcount semantics from the source
/// model; see `DESIGN.md` for why no separate "unique handle" mode is implemented).
#[derive(Clone)]
pub struct TaskQueue(Arc<Inner>);

impl TaskQueue {
    /// Builds a queue that owns two fresh ports and (if needed) a fresh thread pool sized
    /// per `config.pool`. `allow_terminate`/`allow_close` gate [`Self::terminate`] and
    /// [`Self::close`] respectively; both are `true` for ordinary queues and `false` for
    /// [`Self::current_process_queue`].
    pub fn create(config: TaskQueueConfig, allow_terminate: bool, allow_close: bool) -> Result<Self> {
        let needs_pool = matches!(
            config.work_policy,
            DispatchPolicy::ThreadPool | DispatchPolicy::SerializedThreadPool
        ) || matches!(
            config.completion_policy,
            DispatchPolicy::ThreadPool | DispatchPolicy::SerializedThreadPool
        );

        let pool = if needs_pool {
            let workers = config.pool.work_workers.max(config.pool.completion_workers).max(1);
            Some(Arc::new(ThreadPool::new(workers, "taskqueue-pool")))
        } else {
            None
        };

        let work = Port::new("work", config.work_policy, pool.clone())?;
        let completion = Port::new("completion", config.completion_policy, pool.clone())?;

        Ok(Self(Arc::new(Inner {
            work: PortBinding { port: work, context: 0 },
            completion: PortBinding {
                port: completion,
                context: 0,
            },
            _pool: pool,
            monitors: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            ids: IdGenerator::default(),
            allow_terminate,
            allow_close,
        })))
    }

    /// Builds a composite queue attached to ports owned elsewhere. The composite's own
    /// `terminate` cancels only entries submitted through it (see
    /// [`Port::terminate_context`]); its `close` never touches the underlying ports.
    #[must_use]
    pub fn create_composite(work: &Arc<Port>, completion: &Arc<Port>) -> Self {
        Self(Arc::new(Inner {
            work: PortBinding {
                port: Arc::clone(work),
                context: work.attach(),
            },
            completion: PortBinding {
                port: Arc::clone(completion),
                context: completion.attach(),
            },
            _pool: None,
            monitors: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            ids: IdGenerator::default(),
            allow_terminate: true,
            allow_close: true,
        }))
    }

    #[must_use]
    fn binding(&self, which: PortKind) -> &PortBinding {
        match which {
            PortKind::Work => &self.0.work,
            PortKind::Completion => &self.0.completion,
        }
    }

    /// True for a queue built by [`Self::create_composite`].
    #[must_use]
    fn is_composite(&self, which: PortKind) -> bool {
        self.binding(which).context != 0
    }

    #[must_use]
    pub fn get_port(&self, which: PortKind) -> Arc<Port> {
        Arc::clone(&self.binding(which).port)
    }

    fn notify_monitors(&self, which: PortKind) {
        let monitors = self.0.monitors.lock();
        for callback in monitors.values() {
            callback(which);
        }
    }

    /// Submits `callback` to `which` port with no delay, having first run every registered
    /// monitor synchronously (in registration order), per the ordering guarantee that
    /// monitor callbacks observe a submission before dispatch can begin.
    pub fn submit<F>(&self, which: PortKind, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.submit_delayed(which, 0, callback)
    }

    pub fn submit_delayed<F>(&self, which: PortKind, delay_ms: u64, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.notify_monitors(which);
        let binding = self.binding(which);
        binding
            .port
            .submit_in_context(binding.context, delay_ms, callback)
    }

    pub fn register_waiter<F>(
        &self,
        which: PortKind,
        handle: crate::util::WaitHandle,
        on_signal: F,
    ) -> Result<QueueWaiterToken>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let port_token = self.binding(which).port.register_waiter(handle, on_signal)?;
        let token = self.0.ids.next();
        self.0.waiters.lock().insert(token, (which, port_token));
        Ok(QueueWaiterToken(token))
    }

    pub fn unregister_waiter(&self, token: QueueWaiterToken) {
        let entry = self.0.waiters.lock().remove(&token.0);
        if let Some((which, port_token)) = entry {
            self.binding(which).port.unregister_waiter(port_token);
        }
    }

    /// Registers a monitor notified (synchronously, under the monitor-registry lock) on
    /// every submission to either port. Capacity is unbounded here (the "tens of entries"
    /// figure in the source is a deployment characteristic, not a hard limit this type
    /// enforces).
    pub fn register_monitor<F>(&self, callback: F) -> MonitorToken
    where
        F: Fn(PortKind) + Send + Sync + 'static,
    {
        let token = self.0.ids.next();
        self.0.monitors.lock().insert(token, Box::new(callback));
        MonitorToken(token)
    }

    /// Removes a monitor. Because registration and removal both take the same lock that
    /// `submit` holds while running monitor callbacks, this call cannot return while one of
    /// this queue's monitor callbacks is still executing.
    pub fn unregister_monitor(&self, token: MonitorToken) {
        self.0.monitors.lock().remove(&token.0);
    }

    /// Terminates Work then Completion in sequence: Work's termination ticket schedules
    /// Completion's termination as its drain callback, so `on_drained` (if given) only runs
    /// after both ports have fully unwound. Fails with [`Error::AccessDenied`] for a queue
    /// built with `allow_terminate = false` (the process queue).
    pub fn terminate<F>(&self, wait: bool, on_drained: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.0.allow_terminate {
            return Err(Error::AccessDenied);
        }

        let done = Arc::new(crate::util::OnceEvent::new());
        let done_for_callback = Arc::clone(&done);
        let on_drained = Box::new(move || {
            on_drained();
            done_for_callback.set();
        });

        let inner = Arc::clone(&self.0);
        let work_drained = move || {
            let inner = inner;
            if inner.is_composite(PortKind::Completion) {
                inner
                    .completion
                    .port
                    .terminate_context(inner.completion.context, on_drained);
            } else {
                let ticket = inner.completion.port.prepare_terminate();
                inner.completion.port.terminate(ticket, on_drained);
            }
        };

        if self.is_composite(PortKind::Work) {
            self.0.work.port.terminate_context(self.0.work.context, work_drained);
        } else {
            let ticket = self.0.work.port.prepare_terminate();
            self.0.work.port.terminate(ticket, work_drained);
        }

        if wait {
            done.wait();
        }
        Ok(())
    }

    /// Returns a new handle sharing the same underlying queue. See the type-level docs for
    /// why this is the only "duplicate" mode this crate implements.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// For an ordinary queue this is an access-control no-op: Rust's `Arc` already manages
    /// the queue's memory, and teardown of the underlying ports is driven explicitly via
    /// [`Self::terminate`] rather than implicitly by a handle count. For the process queue
    /// (`allow_close = false`) this is always a no-op regardless of call count, matching
    /// the "process queue cannot be closed" contract.
    pub fn close(&self) -> Result<()> {
        if !self.0.allow_close {
            event!(Level::DEBUG, "close() on the process queue is a no-op");
            return Ok(());
        }
        self.0.closed.store(true, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }
}

static PROCESS_QUEUE: OnceLock<TaskQueue> = OnceLock::new();

impl TaskQueue {
    /// The single process-wide default queue, lazily built on first access as
    /// ThreadPool/ThreadPool, never closable or terminable by callers.
    pub fn current_process_queue() -> Self {
        PROCESS_QUEUE
            .get_or_init(|| {
                Self::create(TaskQueueConfig::default(), false, false)
                    .expect("constructing the process queue should never fail")
            })
            .clone()
    }
}

/// Installs `queue` as the process-wide default. Fails with [`Error::AlreadyInitialized`]
/// if a process queue already exists (whether installed explicitly or lazily via
/// [`TaskQueue::current_process_queue`]).
pub fn set_current_process_queue(queue: TaskQueue) -> Result<()> {
    PROCESS_QUEUE
        .set(queue)
        .map_err(|_| Error::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn submit_runs_monitors_then_callback() {
        let queue = TaskQueue::create(TaskQueueConfig::default(), true, true).unwrap();
        let monitor_hits = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&monitor_hits);
        queue.register_monitor(move |_which| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, rx) = mpsc::channel();
        queue
            .submit(PortKind::Work, move |canceled| {
                assert!(!canceled);
                tx.send(()).unwrap();
            })
            .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert_eq!(monitor_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn process_queue_close_is_always_a_no_op() {
        // Each test that touches the process queue shares the same process-wide OnceLock,
        // so only assert the properties that hold regardless of init order.
        let queue = TaskQueue::current_process_queue();
        for _ in 0..5 {
            assert!(queue.close().is_ok());
        }
        let err = queue.terminate(false, || {}).unwrap_err();
        assert_eq!(err, Error::AccessDenied);

        let (tx, rx) = mpsc::channel();
        queue
            .submit(PortKind::Work, move |_canceled| tx.send(()).unwrap())
            .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn composite_terminate_does_not_disturb_sibling_composite() {
        let base = TaskQueue::create(TaskQueueConfig::default(), true, true).unwrap();
        let work_port = base.get_port(PortKind::Work);
        let completion_port = base.get_port(PortKind::Completion);

        let c1 = TaskQueue::create_composite(&work_port, &completion_port);
        let c2 = TaskQueue::create_composite(&work_port, &completion_port);

        let c1_canceled = Arc::new(AtomicBool::new(false));
        let c1_flag = Arc::clone(&c1_canceled);
        c1.submit(PortKind::Work, move |canceled| {
            c1_flag.store(canceled, Ordering::SeqCst);
        })
        .unwrap();

        let c2_ran = Arc::new(AtomicBool::new(false));
        let c2_flag = Arc::clone(&c2_ran);
        c2.submit(PortKind::Work, move |canceled| {
            assert!(!canceled);
            c2_flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        c1.terminate(true, || {}).unwrap();
        assert!(c1_canceled.load(Ordering::SeqCst));

        // c2's entry is untouched and still submittable through the base queue.
        let (tx, rx) = mpsc::channel();
        base.submit(PortKind::Work, move |_canceled| tx.send(()).unwrap())
            .unwrap();
        rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
    }
}
