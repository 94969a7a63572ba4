//! The OS waitable-handle type consumed by [`crate::port::Port::register_waiter`].
//!
//! Waitable handles (auto-reset Win32 events being the canonical example) are only
//! available where the host OS exposes them. Where they are not, [`WaitHandle`] still
//! exists as a type (so callers can write platform-independent code) but no registrar
//! can ever be constructed for it and `register_waiter` always fails with
//! [`crate::Error::NotSupported`].

use crate::error::{Error, Result};
use std::fmt;

/// An opaque, OS-owned handle that can become "signaled". Never constructed directly by
/// this crate; callers obtain one from whatever OS facility they are bridging into the
/// task queue (a Win32 event, a socket-ready notification, etc.) and hand it to
/// [`crate::port::Port::register_waiter`].
#[derive(Clone, Copy)]
pub struct WaitHandle(RawWaitHandle);

impl WaitHandle {
    /// # Safety
    /// `raw` must remain valid (not closed) for as long as any registration built from it
    /// is still armed.
    #[must_use]
    pub unsafe fn from_raw(raw: RawWaitHandle) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> RawWaitHandle {
        self.0
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WaitHandle").field(&self.0).finish()
    }
}

#[cfg(windows)]
pub type RawWaitHandle = windows::Win32::Foundation::HANDLE;

#[cfg(not(windows))]
pub type RawWaitHandle = usize;

/// Spawns a dedicated thread that waits on `handle` in a loop (auto-reset semantics: it
/// immediately re-arms after firing) and invokes `on_signal` from that thread each time the
/// handle becomes signaled. The returned [`WaitRegistration`] stops the loop and joins the
/// thread when dropped or when [`WaitRegistration::stop`] is called explicitly.
///
/// Returns [`Error::NotSupported`] on platforms without a waitable-handle facility.
pub fn register<F>(handle: WaitHandle, on_signal: F) -> Result<WaitRegistration>
where
    F: Fn() + Send + 'static,
{
    imp::register(handle, on_signal)
}

pub struct WaitRegistration {
    stop: Option<Box<dyn FnOnce() + Send>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WaitRegistration {
    /// Stops the wait loop and blocks until its thread has exited. Safe to call more than
    /// once; the second call is a no-op, matching the "safe to unregister an invalid token"
    /// contract of [`crate::port::Port::unregister_waiter`].
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(windows)]
mod imp {
    use super::{RawWaitHandle, WaitHandle, WaitRegistration};
    use crate::error::{Error, Result};
    use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows::Win32::System::Threading::{CreateEventW, SetEvent, WaitForMultipleObjects};

    struct OwnedEvent(HANDLE);

    // SAFETY: a Win32 event HANDLE has no thread affinity; only the kernel object matters.
    unsafe impl Send for OwnedEvent {}

    impl Drop for OwnedEvent {
        fn drop(&mut self) {
            // SAFETY: `self.0` was created by `CreateEventW` and is not otherwise closed.
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    pub(super) fn register<F>(handle: WaitHandle, on_signal: F) -> Result<WaitRegistration>
    where
        F: Fn() + Send + 'static,
    {
        // SAFETY: no security attributes, manual-reset=false (auto-reset), not initially
        // signaled; all valid arguments for CreateEventW.
        let stop_event = unsafe { CreateEventW(None, false, false, None) }
            .map_err(|_| Error::Unexpected("failed to create internal stop event"))?;
        let stop_event = OwnedEvent(stop_event);
        let stop_event_for_thread = stop_event.0;
        let target: RawWaitHandle = handle.raw();

        let join = std::thread::Builder::new()
            .name("taskqueue-waiter".into())
            .spawn(move || {
                let handles = [target, stop_event_for_thread];
                loop {
                    // SAFETY: both handles remain valid for the lifetime of this loop: the
                    // caller promised `target` stays valid, and `stop_event` is dropped only
                    // after this thread has been joined.
                    let result = unsafe { WaitForMultipleObjects(&handles, false, u32::MAX) };
                    match result.0 {
                        x if x == WAIT_OBJECT_0.0 => on_signal(),
                        x if x == WAIT_OBJECT_0.0 + 1 => return,
                        _ => return,
                    }
                }
            })
            .map_err(|_| Error::Unexpected("failed to spawn waiter thread"))?;

        Ok(WaitRegistration {
            stop: Some(Box::new(move || {
                // SAFETY: `stop_event.0` is a valid, still-open event handle.
                unsafe {
                    let _ = SetEvent(stop_event.0);
                }
                // Keep the event alive until the thread has observed it; the thread's own
                // `handles` array borrowed the raw value, not the `OwnedEvent` lifetime, so
                // we must not drop `stop_event` before `SetEvent` above has run. It is moved
                // into this closure and drops here, after `SetEvent`.
            })),
            join: Some(join),
        })
    }
}

#[cfg(not(windows))]
mod imp {
    use super::{WaitHandle, WaitRegistration};
    use crate::error::{Error, Result};

    pub(super) fn register<F>(_handle: WaitHandle, _on_signal: F) -> Result<WaitRegistration>
    where
        F: Fn() + Send + 'static,
    {
        Err(Error::NotSupported)
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    #[test]
    fn register_fails_without_waitable_handles() {
        // SAFETY: the value is never dereferenced on this platform's stub path.
        let handle = unsafe { WaitHandle::from_raw(0) };
        assert_eq!(register(handle, || {}).unwrap_err(), Error::NotSupported);
    }
}
