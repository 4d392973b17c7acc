//! Reference-counted pointer safe to clone and drop in closed code
//!
//! Count increments in closed code are recorded like any other write, so
//! an abort puts the old count back. Decrements are deferred to the commit
//! of the nest: an aborted nest never drops a value it only borrowed. A
//! value created in closed code is freed again if the nest aborts.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use txmem_engine::{did_allocate, did_free, is_closed, on_abort, on_commit, record_write_typed};

struct RcBox<T> {
    count: Cell<usize>,
    value: T,
}

/// Single-threaded shared ownership of a `T`
pub struct TxRc<T: 'static> {
    ptr: NonNull<RcBox<T>>,
    _owns: PhantomData<RcBox<T>>,
}

impl<T: 'static> TxRc<T> {
    /// Move `value` into a new allocation with a count of one
    pub fn new(value: T) -> Self {
        let boxed = Box::new(RcBox {
            count: Cell::new(1),
            value,
        });
        let ptr = NonNull::from(Box::leak(boxed));
        if is_closed() {
            did_allocate(ptr.as_ptr() as *const RcBox<T>, std::mem::size_of::<RcBox<T>>());
            // SAFETY: reached only when the nest aborts, after every write
            // made by it has been undone and no owner survives
            on_abort(move || unsafe { free_box(ptr) });
        }
        TxRc {
            ptr,
            _owns: PhantomData,
        }
    }

    /// Current number of owners
    pub fn strong_count(this: &Self) -> usize {
        this.inner().count.get()
    }

    /// Whether both point to the same allocation
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    fn inner(&self) -> &RcBox<T> {
        // SAFETY: the box lives while any owner does
        unsafe { self.ptr.as_ref() }
    }
}

/// Drop one owner, freeing the box with the last one
///
/// # Safety
///
/// `ptr` must point to a live box and the caller must give up one owner.
unsafe fn release<T>(ptr: NonNull<RcBox<T>>) {
    let count = &ptr.as_ref().count;
    let remaining = count.get() - 1;
    count.set(remaining);
    if remaining == 0 {
        free_box(ptr);
    }
}

/// # Safety
///
/// No owner of `ptr` may be used afterwards.
unsafe fn free_box<T>(ptr: NonNull<RcBox<T>>) {
    did_free(ptr.as_ptr() as *const RcBox<T>);
    drop(Box::from_raw(ptr.as_ptr()));
}

impl<T: 'static> Clone for TxRc<T> {
    fn clone(&self) -> Self {
        let count = &self.inner().count;
        // SAFETY: the count lives in the box, which an abort cannot free
        // while this owner exists
        unsafe { record_write_typed(count.as_ptr() as *const usize) };
        count.set(count.get() + 1);
        TxRc {
            ptr: self.ptr,
            _owns: PhantomData,
        }
    }
}

impl<T: 'static> Drop for TxRc<T> {
    fn drop(&mut self) {
        let ptr = self.ptr;
        if is_closed() {
            // SAFETY: the owner given up here is not used after the commit
            on_commit(move || unsafe { release(ptr) });
        } else {
            // SAFETY: this owner is going away
            unsafe { release(ptr) };
        }
    }
}

impl<T: 'static> Deref for TxRc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for TxRc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
