pub mod once_event;
pub mod wait_handle;

pub use once_event::OnceEvent;
pub use wait_handle::{WaitHandle, WaitRegistration};

/// A monotonically increasing id generator used for queue entry ids, waiter tokens,
/// monitor tokens and termination tickets. Wraps around only after `u64::MAX` submissions,
/// which is not a practical concern for a process-lifetime counter.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator(std::sync::atomic::AtomicU64);

impl IdGenerator {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}
