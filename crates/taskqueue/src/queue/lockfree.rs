//! C3: a multi-producer multi-consumer FIFO with a node-reservation API.
//!
//! The hot path (`push_back`/`pop_front` without a reservation) is genuinely lock-free,
//! backed by [`crossbeam::queue::SegQueue`]. Node reservation and `remove_if` are rare
//! paths (used only for the termination ticket and for selective cancellation
//! respectively) and are layered on top with a small side mutex that the hot path never
//! touches.

use crate::util::IdGenerator;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::collections::HashSet;

struct Entry<T> {
    id: u64,
    value: T,
}

/// A FIFO of `T`, safe to push to and pop from concurrently from any number of threads.
pub struct LockFreeQueue<T> {
    items: SegQueue<Entry<T>>,
    reserved_ids: Mutex<HashSet<u64>>,
    ids: IdGenerator,
}

impl<T> LockFreeQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            reserved_ids: Mutex::new(HashSet::new()),
            ids: IdGenerator::default(),
        }
    }

    /// Pre-allocates a slot for a later `push_back`, identified by the returned node id.
    /// Reserving and never consuming the reservation (other than via [`Self::free_node`])
    /// leaks nothing beyond a tiny id-set entry.
    pub fn reserve_node(&self) -> u64 {
        let id = self.ids.next();
        self.reserved_ids.lock().insert(id);
        id
    }

    /// Releases a reservation that will never be used. Safe to call with an id that was
    /// never reserved or was already consumed/freed (no-op).
    pub fn free_node(&self, id: u64) {
        self.reserved_ids.lock().remove(&id);
    }

    /// Appends `value`. `reserved`, if given, must name a live reservation; it is consumed
    /// by this call.
    pub fn push_back(&self, value: T, reserved: Option<u64>) {
        let id = match reserved {
            Some(id) => {
                self.reserved_ids.lock().remove(&id);
                id
            }
            None => self.ids.next(),
        };
        self.items.push(Entry { id, value });
    }

    /// Removes and returns the head of the FIFO, if any.
    pub fn pop_front(&self) -> Option<T> {
        self.items.pop().map(|entry| entry.value)
    }

    /// Removes every entry for which `predicate` returns `true`, preserving the relative
    /// order of the entries that remain, and returns the removed values in their original
    /// order. Used for selective cancellation (e.g. dropping only the entries that belong
    /// to one composite queue's port-context). Not safe to call concurrently with another
    /// `remove_if` on the same queue; concurrent `push_back`/`pop_front` is fine, though an
    /// entry pushed mid-scan may or may not be observed, same as a plain `pop_front`.
    pub fn remove_if(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let mut kept = Vec::new();
        while let Some(entry) = self.items.pop() {
            if predicate(&entry.value) {
                removed.push(entry.value);
            } else {
                kept.push(entry);
            }
        }
        for entry in kept {
            self.items.push(entry);
        }
        removed
    }

    /// A `pop_front` observing this as non-empty (or empty) does not imply the same for a
    /// subsequent call; concurrent producers/consumers may have changed the state by then.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
