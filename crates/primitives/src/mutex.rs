//! Transaction-aware mutex
//!
//! Outside closed code [`TxMutex`] behaves like a reentrant-per-thread
//! mutex. In closed code the first acquisition in a nest takes the real
//! lock without blocking; if the lock is held elsewhere the whole nest is
//! aborted and retried. Once taken, the lock stays held until the nest
//! finishes: every closed acquisition registers an on-commit and an
//! on-abort release, and exactly one of the two runs.
//!
//! ```ignore
//! let counter = Arc::new(TxMutex::new(0u64));
//! transact(|| {
//!     let mut guard = counter.lock();
//!     let next = *guard + 1;
//!     guard.set(next);
//! });
//! ```

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use txmem_engine::{abort_on_failed_lock_acquisition, is_closed, on_abort, on_commit};

thread_local! {
    static THREAD_TOKEN: u8 = const { 0 };
}

/// Nonzero identity of the calling thread
fn thread_token() -> usize {
    THREAD_TOKEN.with(|token| token as *const u8 as usize)
}

/// A mutex whose closed-code acquisitions last until the nest finishes
pub struct TxMutex<T> {
    raw: RawMutex,
    /// Token of the owning thread, 0 when unowned
    owner: AtomicUsize,
    /// Acquisitions held by the owner; only the owner touches it
    depth: AtomicUsize,
    locks: AtomicU64,
    unlocks: AtomicU64,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`
unsafe impl<T: Send> Send for TxMutex<T> {}
unsafe impl<T: Send> Sync for TxMutex<T> {}

impl<T> TxMutex<T> {
    /// New unlocked mutex
    pub fn new(value: T) -> Self {
        TxMutex {
            raw: RawMutex::INIT,
            owner: AtomicUsize::new(0),
            depth: AtomicUsize::new(0),
            locks: AtomicU64::new(0),
            unlocks: AtomicU64::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Whether some thread holds the real lock
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    /// Times the real lock was taken
    pub fn lock_count(&self) -> u64 {
        self.locks.load(Ordering::Relaxed)
    }

    /// Times the real lock was released
    pub fn unlock_count(&self) -> u64 {
        self.unlocks.load(Ordering::Relaxed)
    }

    /// Mutable access without locking
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == thread_token()
    }

    fn mark_acquired(&self) {
        self.owner.store(thread_token(), Ordering::Release);
        self.depth.store(1, Ordering::Relaxed);
        self.locks.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        let previous = self.depth.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "TxMutex released more often than acquired");
        if previous == 1 {
            self.owner.store(0, Ordering::Release);
            self.unlocks.fetch_add(1, Ordering::Relaxed);
            // SAFETY: depth reached zero on the owning thread, which holds `raw`
            unsafe { self.raw.unlock() };
        }
    }
}

impl<T: Send + 'static> TxMutex<T> {
    /// Acquire the mutex
    ///
    /// Outside closed code this blocks. In closed code it never blocks: a
    /// lock held by another thread aborts the nest, which is retried after
    /// yielding.
    pub fn lock(self: &Arc<Self>) -> TxMutexGuard<'_, T> {
        if is_closed() {
            self.acquire_closed();
            return TxMutexGuard {
                mutex: self,
                release_on_drop: false,
            };
        }
        if self.is_owned_by_current_thread() {
            self.depth.fetch_add(1, Ordering::Relaxed);
        } else {
            self.raw.lock();
            self.mark_acquired();
        }
        TxMutexGuard {
            mutex: self,
            release_on_drop: true,
        }
    }

    fn acquire_closed(self: &Arc<Self>) {
        if self.is_owned_by_current_thread() {
            self.depth.fetch_add(1, Ordering::Relaxed);
        } else if self.raw.try_lock() {
            self.mark_acquired();
        } else {
            tracing::trace!("transactional lock busy");
            abort_on_failed_lock_acquisition();
        }
        let committed = Arc::clone(self);
        on_commit(move || committed.release());
        let aborted = Arc::clone(self);
        on_abort(move || aborted.release());
    }
}

impl<T: Default> Default for TxMutex<T> {
    fn default() -> Self {
        TxMutex::new(T::default())
    }
}

impl<T> fmt::Debug for TxMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxMutex")
            .field("locked", &self.is_locked())
            .field("lock_count", &self.lock_count())
            .field("unlock_count", &self.unlock_count())
            .finish_non_exhaustive()
    }
}

/// Access to the data of a locked [`TxMutex`]
///
/// A guard taken in closed code releases nothing when dropped; the nest's
/// commit or abort does.
pub struct TxMutexGuard<'a, T> {
    mutex: &'a TxMutex<T>,
    release_on_drop: bool,
}

impl<T: Copy> TxMutexGuard<'_, T> {
    /// Store `value`, recording the old one when in closed code
    pub fn set(&mut self, value: T) {
        // SAFETY: the mutex outlives the nest; its release handlers own
        // a reference to it
        unsafe { txmem_engine::write(&mut **self, value) };
    }
}

impl<T> Deref for TxMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the current thread holds the lock
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for TxMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as for `deref`
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for TxMutexGuard<'_, T> {
    fn drop(&mut self) {
        if self.release_on_drop {
            self.mutex.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TxMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
