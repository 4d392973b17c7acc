//! Memory hooks
//!
//! Closed code reports every store it is about to perform so the bytes can
//! be restored on abort. Allocators report fresh and released blocks so
//! the engine neither snapshots memory that did not exist before the frame
//! nor validates memory that no longer exists.
//!
//! # Safety
//!
//! The recording hooks are `unsafe`: a recorded region must stay valid for
//! reads and writes until the enclosing nest finishes, because an abort
//! writes the saved bytes back into it.

use crate::context::try_with_context;
use crate::validation::WriteRange;

/// Address of a local in a fresh stack frame below the caller's
#[inline(never)]
fn stack_probe() -> usize {
    let probe = 0u8;
    std::hint::black_box(&probe) as *const u8 as usize
}

/// Whether `ptr` lies on the stack used by the innermost transaction body
///
/// Such memory disappears with the body, so writes to it need no undo.
/// Assumes a downward-growing stack.
pub fn is_on_current_transaction_stack<T: ?Sized>(ptr: *const T) -> bool {
    let address = ptr as *const () as usize;
    let probe = stack_probe();
    try_with_context(|ctx| {
        ctx.top()
            .map_or(false, |frame| probe < address && address < frame.stack_marker)
    })
    .unwrap_or(false)
}

/// Record `len` bytes at `ptr` before closed code overwrites them
///
/// A no-op outside closed code, for memory allocated by the innermost
/// frame and for the innermost body's own stack.
///
/// # Safety
///
/// `ptr..ptr + len` must be readable now and stay writable until the
/// enclosing nest finishes.
pub unsafe fn record_write(ptr: *const u8, len: usize) {
    if len == 0 {
        return;
    }
    let address = ptr as usize;
    let probe = stack_probe();
    try_with_context(|ctx| {
        if !ctx.is_closed() {
            return;
        }
        let range = WriteRange::new(address, len);
        let Some(frame) = ctx.top_mut() else {
            return;
        };
        if (probe < address && address < frame.stack_marker) || frame.is_fresh(&range) {
            return;
        }
        frame.note_stack_probe(probe);
        frame.undo.record(ptr, len);
        frame.validation.insert(range);
    });
}

/// Record a whole value before closed code overwrites it
///
/// # Safety
///
/// As for [`record_write`], over `size_of::<T>()` bytes at `target`.
pub unsafe fn record_write_typed<T: Copy>(target: *const T) {
    record_write(target as *const u8, std::mem::size_of::<T>());
}

/// Record `*target` and then store `value` into it
///
/// # Safety
///
/// `*target` must stay valid until the enclosing nest finishes.
pub unsafe fn write<T: Copy>(target: &mut T, value: T) {
    let ptr: *mut T = target;
    record_write_typed(ptr);
    ptr.write(value);
}

/// Record a write open code is about to make inside a transaction
///
/// The write becomes undoable like a closed write and its range joins the
/// innermost frame's validation record.
///
/// # Safety
///
/// As for [`record_write`].
pub unsafe fn record_open_write(ptr: *const u8, len: usize) {
    record_open(ptr, len, true);
}

/// Like [`record_open_write`], but excuses the range from the current
/// open scope's validation
///
/// # Safety
///
/// As for [`record_write`].
pub unsafe fn record_open_write_no_memory_validation(ptr: *const u8, len: usize) {
    record_open(ptr, len, false);
    crate::open::excuse_range(WriteRange::new(ptr as usize, len));
}

/// Typed [`record_open_write`]
///
/// # Safety
///
/// As for [`record_write`], over `size_of::<T>()` bytes at `target`.
pub unsafe fn record_open_write_typed<T: Copy>(target: *const T) {
    record_open_write(target as *const u8, std::mem::size_of::<T>());
}

unsafe fn record_open(ptr: *const u8, len: usize, validate: bool) {
    if len == 0 {
        return;
    }
    let address = ptr as usize;
    let probe = stack_probe();
    let range = WriteRange::new(address, len);
    try_with_context(|ctx| {
        if ctx.status != txmem_core::ContextStatus::OnTrack {
            return;
        }
        let Some(frame) = ctx.top_mut() else {
            return;
        };
        if (probe < address && address < frame.stack_marker) || frame.is_fresh(&range) {
            return;
        }
        frame.note_stack_probe(probe);
        frame.undo.record(ptr, len);
        if validate {
            frame.validation.insert(range);
        }
    });
}

/// Report a block allocated by closed code
///
/// Writes into it are not recorded while the allocating frame is
/// innermost; the allocator's own on-abort handler reclaims it.
pub fn did_allocate<T: ?Sized>(ptr: *const T, len: usize) {
    let base = ptr as *const () as usize;
    try_with_context(|ctx| {
        if ctx.is_closed() {
            if let Some(frame) = ctx.top_mut() {
                frame.note_allocation(base, len);
            }
        }
    });
}

/// Report a block that was released
///
/// The block's recorded writes and validated ranges are forgotten.
pub fn did_free<T: ?Sized>(ptr: *const T) {
    let base = ptr as *const () as usize;
    try_with_context(|ctx| {
        if ctx.in_transaction() {
            ctx.forget_block(base);
        }
    });
}
