//! Deferred-effect handler queues
//!
//! Each frame owns two queues: on-commit handlers (run FIFO once the whole
//! nest commits) and on-abort handlers (run LIFO when the frame aborts).
//! Entries may carry a [`HandlerKey`] so that a scope can cancel the
//! handler it registered before it would fire.
//!
//! A pop that finds no matching entry in the innermost frame is kept as a
//! [`PendingPop`] and applied to the parent if the frame commits.

/// Opaque identity used to cancel a keyed handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey(usize);

impl HandlerKey {
    /// Key from an arbitrary integer
    pub const fn new(id: usize) -> Self {
        HandlerKey(id)
    }

    /// Key from the address of a value
    pub fn of<T: ?Sized>(value: &T) -> Self {
        HandlerKey(value as *const T as *const () as usize)
    }

    /// Key from a raw pointer
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Self {
        HandlerKey(ptr as *const () as usize)
    }
}

/// A deferred callable
pub(crate) type Handler = Box<dyn FnOnce()>;

struct HandlerEntry {
    key: Option<HandlerKey>,
    work: Handler,
}

/// Ordered list of handlers of one kind
#[derive(Default)]
pub(crate) struct HandlerQueue {
    entries: Vec<HandlerEntry>,
}

impl HandlerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, key: Option<HandlerKey>, work: Handler) {
        self.entries.push(HandlerEntry { key, work });
    }

    /// Remove the most recently pushed entry with `key`
    pub(crate) fn pop(&mut self, key: HandlerKey) -> bool {
        match self.entries.iter().rposition(|e| e.key == Some(key)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every entry with `key`, returning how many were removed
    pub(crate) fn pop_all(&mut self, key: HandlerKey) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.key != Some(key));
        before - self.entries.len()
    }

    /// Move every entry of `other` behind ours
    pub(crate) fn append(&mut self, other: &mut HandlerQueue) {
        self.entries.append(&mut other.entries);
    }

    /// Drain in registration order
    pub(crate) fn take_fifo(&mut self) -> Vec<Handler> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|e| e.work)
            .collect()
    }

    /// Drain in reverse registration order
    pub(crate) fn take_lifo(&mut self) -> Vec<Handler> {
        let mut handlers = self.take_fifo();
        handlers.reverse();
        handlers
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for HandlerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerQueue")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// A pop that still has to reach an ancestor frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingPop {
    One(HandlerKey),
    All(HandlerKey),
}

/// Apply a child's pending pops to its parent's queue
///
/// Pops that miss again stay pending on the parent.
pub(crate) fn apply_pending_pops(
    pops: Vec<PendingPop>,
    queue: &mut HandlerQueue,
    pending: &mut Vec<PendingPop>,
) {
    for pop in pops {
        match pop {
            PendingPop::One(key) => {
                if !queue.pop(key) {
                    pending.push(pop);
                }
            }
            PendingPop::All(key) => {
                queue.pop_all(key);
                pending.push(pop);
            }
        }
    }
}
