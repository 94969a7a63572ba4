//! Per-port waiter bookkeeping layered on [`crate::util::wait_handle`].
//!
//! A waiter's underlying signal (an auto-reset OS event, typically) can fire more than
//! once, so the callback handed to [`arm`] is an `Arc<dyn Fn>` rather than a `FnOnce`: each
//! firing produces one fresh entry on the owning port's active FIFO.

use crate::error::Result;
use crate::util::wait_handle::{self, WaitHandle, WaitRegistration};
use std::sync::Arc;

pub(crate) struct ArmedWaiter {
    registration: WaitRegistration,
}

pub(crate) fn arm(
    handle: WaitHandle,
    on_signal: Arc<dyn Fn() + Send + Sync>,
) -> Result<ArmedWaiter> {
    let registration = wait_handle::register(handle, move || on_signal())?;
    Ok(ArmedWaiter { registration })
}

impl ArmedWaiter {
    pub(crate) fn disarm_and_join(mut self) {
        self.registration.stop();
    }
}

/// Opaque handle returned by [`super::Port::register_waiter`], passed back to
/// [`super::Port::unregister_waiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterToken(pub(crate) u64);
