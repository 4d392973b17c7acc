//! Undo log
//!
//! Before a tracked store overwrites memory, the bytes it is about to
//! replace are copied into the innermost frame's undo log. Aborting the
//! frame replays the log in strict reverse order, so the oldest snapshot
//! of any location is the one left in place.
//!
//! Snapshot bytes live in a single [`HostBuffer`] obtained from the host
//! allocation callbacks.
//!
//! # Safety model
//!
//! Recording and restoring read and write arbitrary addresses. Callers of
//! the public write hooks promise that every recorded region stays valid
//! for writes until the enclosing nest finishes; the log relies on that.

use rustc_hash::FxHashSet;
use std::ptr::NonNull;
use txmem_runtime::{config, fatal, Host};

const BUFFER_ALIGN: usize = 16;
const MIN_CAPACITY: usize = 256;

/// Growable byte buffer backed by the host allocation callbacks
pub(crate) struct HostBuffer {
    host: Host,
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
}

impl HostBuffer {
    pub(crate) fn new() -> Self {
        HostBuffer {
            host: config().host(),
            ptr: NonNull::dangling(),
            len: 0,
            capacity: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn reserve(&mut self, additional: usize) {
        let needed = match self.len.checked_add(additional) {
            Some(needed) => needed,
            None => fatal!("undo buffer size overflow"),
        };
        if needed <= self.capacity {
            return;
        }
        let new_capacity = needed.max(self.capacity * 2).max(MIN_CAPACITY);
        let raw = if self.capacity == 0 {
            self.host.allocate_zeroed(new_capacity, BUFFER_ALIGN)
        } else {
            self.host.reallocate(
                self.ptr.as_ptr(),
                self.capacity,
                new_capacity,
                BUFFER_ALIGN,
            )
        };
        match NonNull::new(raw) {
            Some(ptr) => {
                self.ptr = ptr;
                self.capacity = new_capacity;
            }
            None => fatal!("host allocation of {} bytes failed", new_capacity),
        }
    }

    /// Append `len` bytes read from `src`, returning their offset
    ///
    /// # Safety
    ///
    /// `src..src + len` must be readable.
    pub(crate) unsafe fn extend_from_raw(&mut self, src: *const u8, len: usize) -> usize {
        self.reserve(len);
        let offset = self.len;
        std::ptr::copy_nonoverlapping(src, self.ptr.as_ptr().add(offset), len);
        self.len += len;
        offset
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        // SAFETY: a slice is always readable
        unsafe { self.extend_from_raw(bytes.as_ptr(), bytes.len()) }
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.len, "undo buffer read out of bounds");
        // SAFETY: checked against the initialized length
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        if self.capacity > 0 {
            self.host
                .free(self.ptr.as_ptr(), self.capacity, BUFFER_ALIGN);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct UndoEntry {
    address: usize,
    len: usize,
    offset: usize,
}

/// Per-frame log of (address, length, prior bytes)
pub(crate) struct UndoLog {
    entries: Vec<UndoEntry>,
    bytes: HostBuffer,
    /// Locations already snapshotted by this frame
    recorded: FxHashSet<(usize, usize)>,
}

impl UndoLog {
    pub(crate) fn new() -> Self {
        UndoLog {
            entries: Vec::new(),
            bytes: HostBuffer::new(),
            recorded: FxHashSet::default(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total snapshot bytes held
    #[cfg(test)]
    pub(crate) fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Snapshot `len` bytes at `address`
    ///
    /// Only the first snapshot of a given location is kept; later ones
    /// would be overwritten by it during replay anyway.
    ///
    /// # Safety
    ///
    /// `address..address + len` must be readable now and writable until
    /// this log is restored or discarded.
    pub(crate) unsafe fn record(&mut self, address: *const u8, len: usize) {
        if len == 0 || !self.recorded.insert((address as usize, len)) {
            return;
        }
        let offset = self.bytes.extend_from_raw(address, len);
        self.entries.push(UndoEntry {
            address: address as usize,
            len,
            offset,
        });
    }

    /// Write every snapshot back, newest first, and empty the log
    ///
    /// # Safety
    ///
    /// Every recorded region must still be writable.
    pub(crate) unsafe fn restore(&mut self) {
        for entry in self.entries.iter().rev() {
            let saved = self.bytes.bytes(entry.offset, entry.len);
            std::ptr::copy_nonoverlapping(saved.as_ptr(), entry.address as *mut u8, entry.len);
        }
        self.discard();
    }

    /// Forget every snapshot without writing anything
    pub(crate) fn discard(&mut self) {
        self.entries.clear();
        self.recorded.clear();
        self.bytes.clear();
    }

    /// Move a committed child's snapshots behind ours
    pub(crate) fn append(&mut self, mut child: UndoLog) {
        for entry in child.entries.drain(..) {
            let offset = self
                .bytes
                .extend_from_slice(child.bytes.bytes(entry.offset, entry.len));
            self.entries.push(UndoEntry { offset, ..entry });
        }
        self.recorded.extend(child.recorded.drain());
    }

    /// Drop snapshots that start inside `[base, base + len)`
    pub(crate) fn forget_range(&mut self, base: usize, len: usize) -> usize {
        let end = base.saturating_add(len.max(1));
        let inside = |address: usize| address >= base && address < end;
        let before = self.entries.len();
        self.entries.retain(|e| !inside(e.address));
        self.recorded.retain(|(address, _)| !inside(*address));
        before - self.entries.len()
    }
}

impl std::fmt::Debug for UndoLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoLog")
            .field("entries", &self.entries.len())
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
