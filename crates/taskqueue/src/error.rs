use thiserror::Error;

/// Error kinds surfaced by every public verb in this crate.
///
/// Mirrors the sentinel set a host application expects from the underlying
/// platform error type: callers match on the kind, the `Display` impl is for
/// logs only.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Target is shutting down, or the operation itself was canceled.
    #[error("operation aborted because the target is shutting down or was canceled")]
    Aborted,

    /// Not yet complete. Valid as a `DoWork` return and as a non-waiting `get_status` result.
    #[error("operation is still pending")]
    Pending,

    /// Any allocation failure. State is never partially mutated when this is returned.
    #[error("out of memory")]
    OutOfMemory,

    /// Nil/invalid argument, identity mismatch, or a verb called in the wrong state.
    #[error("invalid argument")]
    InvalidArg,

    /// A library-scope singleton has not been constructed yet.
    #[error("not initialized")]
    NotInitialized,

    /// An async operation was begun without an explicit queue and there is no process default.
    #[error("no task queue available")]
    NoTaskQueue,

    /// Attempted to close or terminate a queue that forbids it (the process queue).
    #[error("access denied")]
    AccessDenied,

    /// OS waitable handles are not available on this platform.
    #[error("not supported on this platform")]
    NotSupported,

    /// A library-scope singleton has already been constructed.
    #[error("already initialized")]
    AlreadyInitialized,

    /// Internal invariant violation. Callers may assume this indicates a bug in this crate.
    #[error("unexpected internal error: {0}")]
    Unexpected(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the two kinds that represent a shutdown/cancel in progress rather than
    /// a caller mistake.
    #[must_use]
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Aborted)
    }
}
