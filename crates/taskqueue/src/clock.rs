//! Monotonic time types used by the wait timer and the per-port pending set.
//!
//! Everything here is built on [`std::time::Instant`]; there is no wall-clock
//! dependency anywhere in this crate, matching the no-exit-codes/no-env-vars/
//! no-file-formats stance of the library as a whole.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// An absolute point in time in the process' monotonic clock epoch.
///
/// A zero deadline means "ready now" (used by [`crate::port::Port::submit`] to
/// distinguish an immediate submission from a delayed one without an `Option`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// The "ready now" deadline.
    pub const READY: Self = Self(None);

    #[must_use]
    pub fn now() -> Self {
        Self(Some(Instant::now()))
    }

    #[must_use]
    pub fn now_plus(delay: Duration) -> Self {
        if delay.is_zero() {
            Self::READY
        } else {
            Self(Some(Instant::now() + delay))
        }
    }

    #[must_use]
    pub fn is_ready(self) -> bool {
        match self.0 {
            None => true,
            Some(at) => at <= Instant::now(),
        }
    }

    /// How long remains until this deadline, or `Duration::ZERO` if it has passed (or is
    /// the `READY` deadline).
    #[must_use]
    pub fn remaining(self) -> Duration {
        match self.0 {
            None => Duration::ZERO,
            Some(at) => at.saturating_duration_since(Instant::now()),
        }
    }

    #[must_use]
    pub fn as_instant(self) -> Option<Instant> {
        self.0
    }
}

/// A clock that samples [`Instant::now`] at most once every [`TICK`], shared by readers
/// across threads via a single atomic. Available for call sites that only need a coarse
/// "roughly now" and would rather avoid a syscall per read under load; nothing in this
/// crate's hot paths currently needs that tradeoff, since port dispatch and the pending set
/// both key off exact deadlines (see [`Deadline`]).
///
/// Precision is therefore on the order of [`TICK`], not instantaneous; callers that need
/// exact monotonic time use [`Instant::now`] / [`Deadline::now`] directly instead.
#[derive(Debug)]
pub struct LowPrecisionClock {
    origin: Instant,
    ticks: AtomicU64,
}

const TICK: Duration = Duration::from_millis(15);

impl LowPrecisionClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            ticks: AtomicU64::new(0),
        }
    }

    /// Returns the most recently observed approximate instant, refreshing it if `TICK`
    /// has elapsed since the last refresh.
    pub fn now(&self) -> Instant {
        let elapsed = self.origin.elapsed();
        let current_tick = (elapsed.as_millis() / TICK.as_millis()) as u64;
        let previous_tick = self.ticks.swap(current_tick, Ordering::Relaxed);
        let effective_tick = current_tick.max(previous_tick);
        self.origin + TICK.saturating_mul(u32::try_from(effective_tick).unwrap_or(u32::MAX))
    }
}

impl Default for LowPrecisionClock {
    fn default() -> Self {
        Self::new()
    }
}
