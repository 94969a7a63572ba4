use std::cmp::Ordering;
use std::time::Instant;

/// A submitted callback. The `bool` is the `canceled` flag: `false` if the callback is
/// running because it was actually due, `true` if the port delivered it only to satisfy
/// the "every entry's callback runs exactly once" guarantee during cancellation/shutdown.
pub(crate) type Callback = Box<dyn FnOnce(bool) + Send>;

/// The context tag used by [`super::Port::terminate_context`] to cancel only the entries
/// submitted through one composite task queue's port-context, leaving entries submitted
/// through other composites (or the owning queue itself) untouched. `0` names the owning
/// queue's own context.
pub(crate) type PortContext = u64;

/// An entry sitting in the lock-free active FIFO.
pub(crate) struct ActiveEntry {
    pub(crate) context: PortContext,
    pub(crate) callback: Callback,
}

/// An entry sitting in the pending (delayed) set, ordered by deadline and then by id so
/// that two entries submitted with the same deadline from the same thread dispatch in
/// submission order (the id generator is a single process-wide monotonic counter).
pub(crate) struct PendingEntry {
    pub(crate) deadline: Instant,
    pub(crate) id: u64,
    pub(crate) context: PortContext,
    pub(crate) callback: Callback,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    /// Reversed so a [`std::collections::BinaryHeap`] (a max-heap) pops the *earliest*
    /// deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}
