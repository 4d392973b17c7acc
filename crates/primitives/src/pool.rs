//! Fixed-size block pool
//!
//! Blocks come from the host allocation callbacks and are recycled
//! through a free list. In closed code an allocation is reported to the
//! engine as fresh, so writes into it are not snapshotted, and an on-abort
//! handler puts it back on the free list. Frees in closed code are
//! deferred until the nest commits, since an abort may still need the
//! block.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;
use txmem_engine::{did_allocate, is_closed, on_abort, on_commit};
use txmem_runtime::{config, fatal, host_ensure, Host};

/// Pool of equally sized blocks
///
/// Single-threaded; share it within a thread through `Rc`.
pub struct TxPool {
    host: Host,
    block_size: usize,
    align: usize,
    free: RefCell<Vec<NonNull<u8>>>,
    /// Blocks obtained from the host and not yet returned to it
    owned: Cell<usize>,
}

impl TxPool {
    /// Pool handing out blocks of `block_size` bytes aligned to `align`
    pub fn new(block_size: usize, align: usize) -> Rc<Self> {
        host_ensure!(block_size != 0, "pool block size must be nonzero");
        host_ensure!(align.is_power_of_two(), "pool alignment {} is not a power of two", align);
        Rc::new(TxPool {
            host: config().host(),
            block_size,
            align,
            free: RefCell::new(Vec::new()),
            owned: Cell::new(0),
        })
    }

    /// Size of every block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Blocks on the free list
    pub fn free_count(&self) -> usize {
        self.free.borrow().len()
    }

    /// Blocks currently obtained from the host, free or in use
    pub fn owned_count(&self) -> usize {
        self.owned.get()
    }

    /// Take a block
    pub fn allocate(self: &Rc<Self>) -> NonNull<u8> {
        let block = self.take_block();
        if is_closed() {
            did_allocate(block.as_ptr() as *const u8, self.block_size);
            let pool = Rc::clone(self);
            on_abort(move || pool.recycle(block));
        }
        block
    }

    /// Give a block back
    ///
    /// In closed code the block stays untouched until the nest commits.
    ///
    /// # Safety
    ///
    /// `block` must come from [`TxPool::allocate`] on this pool and must not
    /// be used after the free takes effect.
    pub unsafe fn free(self: &Rc<Self>, block: NonNull<u8>) {
        if is_closed() {
            let pool = Rc::clone(self);
            on_commit(move || pool.recycle(block));
        } else {
            self.recycle(block);
        }
    }

    fn take_block(&self) -> NonNull<u8> {
        if let Some(block) = self.free.borrow_mut().pop() {
            return block;
        }
        match NonNull::new(self.host.allocate(self.block_size, self.align)) {
            Some(block) => {
                self.owned.set(self.owned.get() + 1);
                tracing::trace!(size = self.block_size, "pool grew");
                block
            }
            None => fatal!("pool allocation of {} bytes failed", self.block_size),
        }
    }

    fn recycle(&self, block: NonNull<u8>) {
        self.free.borrow_mut().push(block);
    }
}

impl Drop for TxPool {
    fn drop(&mut self) {
        let free = std::mem::take(self.free.get_mut());
        let leaked = self.owned.get().saturating_sub(free.len());
        if leaked > 0 {
            tracing::warn!(leaked, "pool dropped with blocks still in use");
        }
        for block in free {
            self.host.free(block.as_ptr(), self.block_size, self.align);
        }
    }
}

impl std::fmt::Debug for TxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxPool")
            .field("block_size", &self.block_size)
            .field("align", &self.align)
            .field("free", &self.free_count())
            .field("owned", &self.owned_count())
            .finish()
    }
}
