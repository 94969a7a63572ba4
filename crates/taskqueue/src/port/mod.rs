//! C4: a port — one independent FIFO of callbacks with a dispatch policy.
//!
//! A [`TaskQueue`](crate::task_queue::TaskQueue) owns two of these (Work and Completion)
//! and they never share state with one another. A port's lifecycle is
//! `Active -> Canceled -> Terminating -> Terminated`, driven by [`Port::terminate`]; see
//! that method's docs for the exact gating rules around [`Port::suspend_termination`].
//!
//! Composite queues (§4.5) attach to the same underlying `Port` rather than owning one of
//! their own; every entry they submit is tagged with the composite's `port_context` (see
//! [`Port::attach`]) so [`Port::terminate_context`] can cancel exactly that composite's
//! entries without disturbing anyone else sharing the port.

mod entry;
mod waiter;

pub(crate) use entry::{Callback, PortContext};
use entry::{ActiveEntry, PendingEntry};
pub use waiter::WaiterToken;

use crate::clock::Deadline;
use crate::error::{Error, Result};
use crate::queue::LockFreeQueue;
use crate::threadpool::ThreadPool;
use crate::timer::WaitTimer;
use crate::util::wait_handle::WaitHandle;
use parking_lot::{Condvar, Mutex};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{event, Level};

/// How a port decides when and where to invoke its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Nothing runs until a caller invokes [`Port::dispatch`].
    Manual,
    /// Every ready entry runs on a shared [`ThreadPool`], in parallel with one another.
    ThreadPool,
    /// Every ready entry runs on the shared [`ThreadPool`], but never more than one at a
    /// time for this port.
    SerializedThreadPool,
    /// Entries with no delay run synchronously on the submitting thread; delayed entries
    /// run on the pending set's timer thread once due.
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum PortStatus {
    Active,
    Canceled,
    Terminating,
    Terminated,
}

struct TerminationTicket {
    callback: Box<dyn FnOnce() + Send>,
}

struct PortState {
    status: PortStatus,
    suspend_count: u32,
    suspend_termination_count: u32,
    pending: BinaryHeap<PendingEntry>,
    waiters: HashMap<u64, waiter::ArmedWaiter>,
    /// Callbacks currently being invoked on any dispatch path, plus a serialized drain loop
    /// that is between invocations but still "holding" the port busy.
    in_flight: u64,
    serialized_running: bool,
    parked_ticket: Option<(u64, TerminationTicket)>,
    drained: bool,
}

/// A single FIFO with a dispatch policy attached. See the module docs.
pub struct Port {
    policy: DispatchPolicy,
    active: LockFreeQueue<ActiveEntry>,
    termination_chain: LockFreeQueue<TerminationTicket>,
    state: Mutex<PortState>,
    unwind: Condvar,
    /// Parks [`Port::dispatch`] callers for `Manual` ports until new work might exist.
    manual_wake: Condvar,
    timer: WaitTimer,
    thread_pool: Option<Arc<ThreadPool>>,
    ids: AtomicU64,
    name: &'static str,
}

impl Port {
    /// `thread_pool` must be `Some` for [`DispatchPolicy::ThreadPool`] and
    /// [`DispatchPolicy::SerializedThreadPool`]; ignored otherwise.
    pub fn new(
        name: &'static str,
        policy: DispatchPolicy,
        thread_pool: Option<Arc<ThreadPool>>,
    ) -> Result<Arc<Self>> {
        if matches!(
            policy,
            DispatchPolicy::ThreadPool | DispatchPolicy::SerializedThreadPool
        ) && thread_pool.is_none()
        {
            return Err(Error::InvalidArg);
        }

        Ok(Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak_for_timer = Weak::clone(weak);
            let timer = WaitTimer::new(move || {
                if let Some(port) = weak_for_timer.upgrade() {
                    port.on_timer_fired();
                }
            })
            .expect("spawning the port's wait timer should not fail in practice");

            Self {
                policy,
                active: LockFreeQueue::new(),
                termination_chain: LockFreeQueue::new(),
                state: Mutex::new(PortState {
                    status: PortStatus::Active,
                    suspend_count: 0,
                    suspend_termination_count: 0,
                    pending: BinaryHeap::new(),
                    waiters: HashMap::new(),
                    in_flight: 0,
                    serialized_running: false,
                    parked_ticket: None,
                    drained: false,
                }),
                unwind: Condvar::new(),
                manual_wake: Condvar::new(),
                timer,
                thread_pool,
                ids: AtomicU64::new(1),
                name,
            }
        }))
    }

    #[must_use]
    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Mints a fresh [`PortContext`] for a queue (or composite queue) that will submit
    /// entries through this port. `0` is reserved for the port's own owning queue and is
    /// never returned here.
    #[must_use]
    pub fn attach(&self) -> PortContext {
        self.ids.fetch_add(1, Ordering::Relaxed).max(1)
    }

    /// Releases a context minted by [`Self::attach`]. Entries already submitted under it
    /// are left alone; call [`Self::terminate_context`] first if they should be canceled.
    pub fn detach(&self, _context: PortContext) {}

    /// Submits `callback` under the owning queue's own context (`0`). Equivalent to
    /// `submit_in_context(0, delay_ms, callback)`.
    pub fn submit<F>(self: &Arc<Self>, delay_ms: u64, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.submit_in_context(0, delay_ms, callback)
    }

    /// Submits `callback` to run after `delay_ms` (0 for "as soon as possible"), tagged
    /// with `context` (see [`Self::attach`]) for later selective cancellation. Fails with
    /// [`Error::Aborted`] if the port's status has reached [`PortStatus::Terminating`].
    /// `callback`'s `bool` argument is the cancellation flag: `true` if the port is only
    /// delivering it to satisfy the run-exactly-once guarantee during shutdown.
    pub fn submit_in_context<F>(
        self: &Arc<Self>,
        context: PortContext,
        delay_ms: u64,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let callback: Callback = Box::new(callback);

        if delay_ms == 0 {
            {
                let state = self.state.lock();
                if state.status >= PortStatus::Terminating {
                    return Err(Error::Aborted);
                }
            }
            self.active.push_back(ActiveEntry { context, callback }, None);
            self.schedule_one();
            return Ok(());
        }

        let mut state = self.state.lock();
        if state.status >= PortStatus::Terminating {
            return Err(Error::Aborted);
        }
        let deadline = Deadline::now_plus(Duration::from_millis(delay_ms));
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        state.pending.push(PendingEntry {
            deadline: deadline
                .as_instant()
                .unwrap_or_else(std::time::Instant::now),
            id,
            context,
            callback,
        });
        self.rearm_timer_locked(&state);
        Ok(())
    }

    /// Registers a waiter: every time `handle` becomes signaled, the port submits a fresh
    /// active entry (under the owning queue's context) running `on_signal`. Fails with
    /// [`Error::NotSupported`] on platforms without a waitable-handle facility.
    pub fn register_waiter<F>(self: &Arc<Self>, handle: WaitHandle, on_signal: F) -> Result<WaiterToken>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        let on_signal: Arc<dyn Fn(bool) + Send + Sync> = Arc::new(on_signal);
        let port = Arc::downgrade(self);
        let armed = waiter::arm(
            handle,
            Arc::new(move || {
                if let Some(port) = port.upgrade() {
                    port.deliver_waiter(id, Arc::clone(&on_signal));
                }
            }),
        )?;

        let mut state = self.state.lock();
        state.waiters.insert(id, armed);
        Ok(WaiterToken(id))
    }

    fn deliver_waiter(self: &Arc<Self>, id: u64, on_signal: Arc<dyn Fn(bool) + Send + Sync>) {
        {
            let state = self.state.lock();
            if !state.waiters.contains_key(&id) {
                return;
            }
        }
        self.active.push_back(
            ActiveEntry {
                context: 0,
                callback: Box::new(move |canceled| on_signal(canceled)),
            },
            None,
        );
        self.schedule_one();
    }

    /// Unregisters a waiter. Blocks until an in-flight invocation of its underlying wait
    /// thread has exited. Safe to call with an unknown or already-unregistered token.
    pub fn unregister_waiter(&self, token: WaiterToken) {
        let slot = {
            let mut state = self.state.lock();
            state.waiters.remove(&token.0)
        };
        if let Some(slot) = slot {
            slot.disarm_and_join();
        }
    }

    /// Reserves a termination ticket ahead of time, so [`Self::terminate`] itself cannot
    /// fail for lack of a queue node.
    #[must_use]
    pub fn prepare_terminate(&self) -> u64 {
        self.termination_chain.reserve_node()
    }

    /// Releases a reservation from [`Self::prepare_terminate`] that will never be passed to
    /// [`Self::terminate`]. Idempotent: calling it twice, or with an id already consumed by
    /// [`Self::terminate`], is a no-op.
    pub fn cancel_termination(&self, ticket: u64) {
        self.termination_chain.free_node(ticket);
    }

    /// Advances the port to [`PortStatus::Canceled`] (and, suspend-termination gate
    /// permitting, [`PortStatus::Terminating`]), invoking every pending entry's callback
    /// immediately with `canceled = true` and disarming the timer. `on_drained` runs once
    /// the active FIFO, the pending set, and every in-flight invocation have all gone quiet
    /// — on this port's own dispatch policy (a thread pool worker for
    /// `ThreadPool`/`SerializedThreadPool`, inline for `Immediate`, or the next call to
    /// [`Self::dispatch`] for `Manual`).
    ///
    /// This is full-port shutdown: every context's entries are affected, not just one
    /// composite's. Composite queues use [`Self::terminate_context`] instead.
    pub fn terminate<F>(self: &Arc<Self>, ticket: u64, on_drained: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut drained_pending = Vec::new();
        let push_now;
        {
            let mut state = self.state.lock();
            if state.status == PortStatus::Active {
                state.status = PortStatus::Canceled;
            }
            drained_pending.extend(state.pending.drain().map(|e| e.callback));
            self.timer.cancel();

            push_now = state.suspend_termination_count == 0;
            if push_now {
                state.status = PortStatus::Terminating;
            } else {
                state.parked_ticket = Some((
                    ticket,
                    TerminationTicket {
                        callback: Box::new(on_drained),
                    },
                ));
            }
        }

        for callback in drained_pending {
            callback(true);
        }

        if push_now {
            self.termination_chain.push_back(
                TerminationTicket {
                    callback: Box::new(on_drained),
                },
                Some(ticket),
            );
        }

        self.try_drain_termination();
        self.schedule_one();
    }

    /// Scoped cancellation for composite queues (§4.5's "composite termination rule"):
    /// cancels (invokes with `canceled=true`) every active and pending entry tagged with
    /// `context`, leaving the port's status and every other context's entries untouched,
    /// then calls `on_drained`. Does not wait for entries already past the FIFO (in-flight
    /// on a thread pool worker) — those belong to a context-tagging race no different from
    /// the whole-port case and are allowed to complete normally.
    pub fn terminate_context<F>(&self, context: PortContext, on_drained: F)
    where
        F: FnOnce() + Send,
    {
        let removed_active = self.active.remove_if(|entry| entry.context == context);

        let removed_pending = {
            let mut state = self.state.lock();
            let mut survivors = BinaryHeap::with_capacity(state.pending.len());
            let mut removed = Vec::new();
            for entry in state.pending.drain() {
                if entry.context == context {
                    removed.push(entry.callback);
                } else {
                    survivors.push(entry);
                }
            }
            state.pending = survivors;
            removed
        };

        for entry in removed_active {
            (entry.callback)(true);
        }
        for callback in removed_pending {
            callback(true);
        }
        on_drained();
    }

    /// Pauses dispatch: submitted entries accumulate but no callback runs until a matching
    /// number of [`Self::resume`] calls have been made. Does not affect monitor semantics
    /// elsewhere in the stack; `submit` itself still succeeds and still returns promptly.
    pub fn suspend(&self) {
        let mut state = self.state.lock();
        state.suspend_count += 1;
    }

    /// Balances one [`Self::suspend`] call. Once the count returns to zero, dispatch of
    /// whatever accumulated resumes.
    pub fn resume(self: &Arc<Self>) {
        let now_zero = {
            let mut state = self.state.lock();
            if state.suspend_count > 0 {
                state.suspend_count -= 1;
            }
            state.suspend_count == 0
        };
        if now_zero {
            self.kick_after_resume();
        }
    }

    /// Blocks the transition from [`PortStatus::Canceled`] to [`PortStatus::Terminating`].
    /// A concurrent [`Self::terminate`] call still cancels pending entries immediately but
    /// parks its termination chain ticket until the count returns to zero.
    pub fn suspend_termination(&self) {
        let mut state = self.state.lock();
        state.suspend_termination_count += 1;
    }

    /// Balances one [`Self::suspend_termination`] call. If it was the last one outstanding
    /// and a [`Self::terminate`] call is parked, releases it: the port advances to
    /// `Terminating` and its termination chain ticket is scheduled.
    pub fn resume_termination(self: &Arc<Self>) {
        let released = {
            let mut state = self.state.lock();
            if state.suspend_termination_count > 0 {
                state.suspend_termination_count -= 1;
            }
            if state.suspend_termination_count == 0 {
                state.parked_ticket.take()
            } else {
                None
            }
        };
        if let Some((ticket, ticket_state)) = released {
            {
                let mut state = self.state.lock();
                state.status = PortStatus::Terminating;
            }
            self.termination_chain.push_back(ticket_state, Some(ticket));
            self.try_drain_termination();
            self.schedule_one();
        }
    }

    /// True iff the active FIFO and pending set are both empty and no callback is currently
    /// executing. Used by [`crate::task_queue::TaskQueue`] to decide whether it is safe to
    /// tear down.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        self.active.is_empty() && state.pending.is_empty() && state.in_flight == 0
    }

    /// Blocks until no callback is currently executing on this port. Does not prevent new
    /// callbacks from starting after it returns unless the port has already reached
    /// [`PortStatus::Terminating`].
    pub fn wait_for_unwind(&self) {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            self.unwind.wait(&mut state);
        }
    }

    /// For `Manual` ports: runs at most one ready callback (an active entry, or — if
    /// everything else is quiet and the port has fully drained — the next termination
    /// chain ticket). Blocks up to `timeout_ms` for one to become ready; `None` blocks
    /// indefinitely. Returns `true` if something ran.
    ///
    /// Ignored (returns `false` immediately) for any other dispatch policy.
    pub fn dispatch(&self, timeout_ms: Option<u64>) -> bool {
        if self.policy != DispatchPolicy::Manual {
            return false;
        }

        let deadline = timeout_ms.map(|ms| std::time::Instant::now() + Duration::from_millis(ms));

        loop {
            if let Some(entry) = self.active.pop_front() {
                self.invoke_one(entry);
                return true;
            }

            if self.chain_ready_to_drain() {
                if let Some(ticket) = self.termination_chain.pop_front() {
                    (ticket.callback)();
                    return true;
                }
            }

            let mut state = self.state.lock();
            // Re-check under the lock we are about to wait on, so a wakeup that happened
            // between the lock-free checks above and this point is not missed.
            if !self.active.is_empty() || self.chain_ready_to_drain_locked(&state) {
                continue;
            }

            match deadline {
                None => {
                    self.manual_wake.wait(&mut state);
                }
                Some(at) => {
                    let now = std::time::Instant::now();
                    if now >= at {
                        return false;
                    }
                    let timed_out = self
                        .manual_wake
                        .wait_for(&mut state, at - now)
                        .timed_out();
                    if timed_out {
                        return false;
                    }
                }
            }
        }
    }

    /// Whether the port is fully drained and the termination chain still has tickets
    /// waiting — the one case `dispatch` must serve even with `active` empty.
    fn chain_ready_to_drain(&self) -> bool {
        let state = self.state.lock();
        self.chain_ready_to_drain_locked(&state)
    }

    fn chain_ready_to_drain_locked(&self, state: &PortState) -> bool {
        state.status == PortStatus::Terminated
            && state.drained
            && !self.termination_chain.is_empty()
    }

    fn invoke_one(&self, entry: ActiveEntry) {
        let canceled = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.status >= PortStatus::Canceled
        };
        (entry.callback)(canceled);
        self.finish_invocation();
    }

    fn finish_invocation(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.unwind.notify_all();
        }
        drop(state);
        self.try_drain_termination();
    }

    fn rearm_timer_locked(&self, state: &PortState) {
        if let Some(next) = state.pending.peek() {
            self.timer.start(next.deadline);
        } else {
            self.timer.cancel();
        }
    }

    fn on_timer_fired(self: &Arc<Self>) {
        let mut newly_ready = Vec::new();
        {
            let mut state = self.state.lock();
            let now = std::time::Instant::now();
            while let Some(next) = state.pending.peek() {
                if next.deadline > now {
                    break;
                }
                let entry = state.pending.pop().unwrap();
                newly_ready.push(ActiveEntry {
                    context: entry.context,
                    callback: entry.callback,
                });
            }
            self.rearm_timer_locked(&state);
        }

        if newly_ready.is_empty() {
            return;
        }

        match self.policy {
            DispatchPolicy::Immediate => {
                for entry in newly_ready {
                    self.invoke_one(entry);
                }
            }
            _ => {
                let count = newly_ready.len();
                for entry in newly_ready {
                    self.active.push_back(entry, None);
                }
                for _ in 0..count {
                    self.schedule_one();
                }
            }
        }
    }

    /// Wakes (or schedules) exactly one dispatch pulse, gated by `suspend`.
    fn schedule_one(self: &Arc<Self>) {
        {
            let state = self.state.lock();
            if state.suspend_count > 0 {
                return;
            }
        }
        match self.policy {
            DispatchPolicy::Manual => {
                self.manual_wake.notify_all();
            }
            DispatchPolicy::ThreadPool => self.submit_pool_job(false),
            DispatchPolicy::SerializedThreadPool => self.submit_pool_job(true),
            DispatchPolicy::Immediate => self.dispatch_immediate_available(),
        }
    }

    fn kick_after_resume(self: &Arc<Self>) {
        match self.policy {
            DispatchPolicy::Manual => self.manual_wake.notify_all(),
            DispatchPolicy::ThreadPool => {
                for _ in 0..self.active.len() {
                    self.submit_pool_job(false);
                }
            }
            DispatchPolicy::SerializedThreadPool => self.submit_pool_job(true),
            DispatchPolicy::Immediate => self.dispatch_immediate_available(),
        }
    }

    fn dispatch_immediate_available(self: &Arc<Self>) {
        loop {
            {
                let state = self.state.lock();
                if state.suspend_count > 0 {
                    return;
                }
            }
            match self.active.pop_front() {
                Some(entry) => self.invoke_one(entry),
                None => return,
            }
        }
    }

    fn submit_pool_job(self: &Arc<Self>, serialized: bool) {
        let Some(pool) = self.thread_pool.clone() else {
            event!(
                Level::ERROR,
                port = self.name,
                "dispatch scheduled with no thread pool attached"
            );
            return;
        };

        if serialized {
            let mut state = self.state.lock();
            if state.serialized_running {
                return;
            }
            state.serialized_running = true;
        }

        let port = Arc::clone(self);
        pool.submit(move |_instance| {
            if serialized {
                {
                    let mut state = port.state.lock();
                    state.in_flight += 1;
                }
                loop {
                    {
                        let state = port.state.lock();
                        if state.suspend_count > 0 {
                            break;
                        }
                    }
                    match port.active.pop_front() {
                        Some(entry) => {
                            let canceled = {
                                let state = port.state.lock();
                                state.status >= PortStatus::Canceled
                            };
                            (entry.callback)(canceled);
                        }
                        None => break,
                    }
                }
                let mut state = port.state.lock();
                state.serialized_running = false;
                state.in_flight -= 1;
                if state.in_flight == 0 {
                    port.unwind.notify_all();
                }
                drop(state);
                port.try_drain_termination();
            } else if let Some(entry) = port.active.pop_front() {
                port.invoke_one(entry);
            }
        });
    }

    fn try_drain_termination(&self) {
        let should_run = {
            let mut state = self.state.lock();
            if state.status < PortStatus::Terminating || state.drained {
                return;
            }
            if state.in_flight > 0 || !self.active.is_empty() || !state.pending.is_empty() {
                return;
            }
            state.drained = true;
            state.status = PortStatus::Terminated;
            true
        };
        if !should_run {
            return;
        }

        event!(
            Level::DEBUG,
            port = self.name,
            "port drained, running termination chain"
        );

        match self.policy {
            DispatchPolicy::Manual => {
                self.manual_wake.notify_all();
            }
            DispatchPolicy::ThreadPool | DispatchPolicy::SerializedThreadPool => {
                let Some(pool) = self.thread_pool.clone() else {
                    return;
                };
                while let Some(ticket) = self.termination_chain.pop_front() {
                    pool.submit(move |_instance| (ticket.callback)());
                }
            }
            DispatchPolicy::Immediate => {
                while let Some(ticket) = self.termination_chain.pop_front() {
                    (ticket.callback)();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    #[test]
    fn immediate_port_runs_zero_delay_synchronously() {
        let port = Port::new("test", DispatchPolicy::Immediate, None).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        port.submit(0, move |canceled| {
            assert!(!canceled);
            ran2.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn manual_port_dispatch_runs_one_entry_per_call() {
        let port = Port::new("test", DispatchPolicy::Manual, None).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            port.submit(0, move |_canceled| tx.send(i).unwrap()).unwrap();
        }
        for _ in 0..3 {
            assert!(port.dispatch(Some(1_000)));
        }
        let mut received: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        received.sort_unstable();
        assert_eq!(received, vec![0, 1, 2]);
        assert!(!port.dispatch(Some(10)));
    }

    #[test]
    fn terminate_cancels_pending_entries() {
        let port = Port::new("test", DispatchPolicy::Manual, None).unwrap();
        let canceled_flag = Arc::new(AtomicBool::new(false));
        let flag2 = Arc::clone(&canceled_flag);
        port.submit(60_000, move |canceled| {
            flag2.store(canceled, Ordering::SeqCst);
        })
        .unwrap();

        let ticket = port.prepare_terminate();
        let (tx, rx) = mpsc::channel();
        port.terminate(ticket, move || tx.send(()).unwrap());

        assert!(canceled_flag.load(Ordering::SeqCst));
        // The termination chain ticket only runs once the port has drained; for a Manual
        // port that means a caller must still pump `dispatch`.
        assert!(port.dispatch(Some(1_000)));
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn submit_after_terminate_is_aborted() {
        let port = Port::new("test", DispatchPolicy::Manual, None).unwrap();
        let ticket = port.prepare_terminate();
        port.terminate(ticket, || {});
        let err = port.submit(0, |_canceled| {}).unwrap_err();
        assert_eq!(err, Error::Aborted);
    }

    #[test]
    fn terminate_context_only_cancels_its_own_entries() {
        let port = Port::new("test", DispatchPolicy::Manual, None).unwrap();
        let context_a = port.attach();
        let context_b = port.attach();

        // Left in the active FIFO (Manual ports only run entries via `dispatch`), so
        // `terminate_context` has to actually reach in and remove it.
        let a_canceled = Arc::new(AtomicBool::new(false));
        let a_canceled2 = Arc::clone(&a_canceled);
        port.submit_in_context(context_a, 0, move |canceled| {
            a_canceled2.store(canceled, Ordering::SeqCst);
        })
        .unwrap();

        // Left in the pending set, so `terminate_context` also has to reach in there.
        let b_ran = Arc::new(AtomicBool::new(false));
        let b_ran2 = Arc::clone(&b_ran);
        port.submit_in_context(context_b, 60_000, move |canceled| {
            assert!(!canceled);
            b_ran2.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let (tx, rx) = mpsc::channel();
        port.terminate_context(context_a, move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        assert!(a_canceled.load(Ordering::SeqCst));
        // Context B's entry is still pending and the port itself is still Active.
        assert!(!b_ran.load(Ordering::SeqCst));
        let status = {
            let state = port.state.lock();
            state.status
        };
        assert_eq!(status, PortStatus::Active);
    }

    #[test]
    fn suspend_blocks_pool_dispatch_until_matching_resume() {
        let pool = Arc::new(ThreadPool::new(1, "test-pool"));
        let port = Port::new("test", DispatchPolicy::ThreadPool, Some(Arc::clone(&pool))).unwrap();
        port.suspend();
        let (tx, rx) = mpsc::channel();
        port.submit(0, move |_canceled| tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        port.resume();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }
}
