//! A single-fire event that can be waited on synchronously or asynchronously.
//!
//! Used wherever a caller blocks until something happens exactly once: a port's
//! "an entry was queued" signal for [`crate::port::Port::dispatch`], and
//! `get_status(wait=true)` waiting for the completion callback to return.

use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    signaled: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
    waker: AtomicWaker,
}

/// A manual-reset, single-fire event. Once [`OnceEvent::set`] is called, every past and
/// future waiter observes it as signaled; there is no way to reset it (the "once" in the
/// name), matching the use sites in this crate, which all model a terminal transition.
#[derive(Debug, Clone)]
pub struct OnceEvent {
    inner: Arc<Inner>,
}

impl OnceEvent {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.signaled.load(Ordering::Acquire)
    }

    /// Signals the event. Idempotent: calling this more than once has no additional effect.
    pub fn set(&self) {
        // Hold the mutex across the flag flip so a concurrent `wait` cannot observe the
        // flag as false, go to sleep on the condvar, and miss this notification.
        let _guard = self.inner.lock.lock();
        self.inner.signaled.store(true, Ordering::Release);
        self.inner.condvar.notify_all();
        self.inner.waker.wake();
    }

    /// Blocks the calling thread until the event is signaled.
    pub fn wait(&self) {
        if self.is_set() {
            return;
        }
        let mut guard = self.inner.lock.lock();
        while !self.inner.signaled.load(Ordering::Acquire) {
            self.inner.condvar.wait(&mut guard);
        }
    }

    /// Blocks up to `timeout`, returning whether the event was observed signaled.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let mut guard = self.inner.lock.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !self.inner.signaled.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return self.inner.signaled.load(Ordering::Acquire);
            }
            self.inner.condvar.wait_for(&mut guard, remaining);
        }
        true
    }

    #[must_use]
    pub fn wait_async(&self) -> OnceEventFuture {
        OnceEventFuture {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for OnceEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "futures do nothing unless polled"]
pub struct OnceEventFuture {
    inner: Arc<Inner>,
}

impl Future for OnceEventFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.waker.register(cx.waker());
        if self.inner.signaled.load(Ordering::Acquire) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_returns_immediately_once_set() {
        let event = OnceEvent::new();
        event.set();
        event.wait();
        assert!(event.is_set());
    }

    #[test]
    fn wait_blocks_until_set_from_another_thread() {
        let event = OnceEvent::new();
        let event2 = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            event2.set();
        });
        event.wait();
        handle.join().unwrap();
        assert!(event.is_set());
    }

    #[test]
    fn wait_timeout_reports_unset_on_timeout() {
        let event = OnceEvent::new();
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn set_is_idempotent() {
        let event = OnceEvent::new();
        event.set();
        event.set();
        assert!(event.is_set());
    }
}
