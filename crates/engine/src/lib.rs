//! Transaction engine for txmem
//!
//! Runs code speculatively: writes reported through the memory hooks are
//! undone on abort, side effects are deferred through on-commit and
//! on-abort handlers, and transactions nest.
//!
//! # Architecture
//!
//! - `undo`: per-frame log of bytes overwritten by tracked writes
//! - [`validation`]: detection of open writes to transactionally written memory
//! - [`handlers`]: keyed on-commit / on-abort queues
//! - `frame` / `context`: the per-thread stack of frames and its status
//! - [`transact`]: starting, committing, aborting and cascading
//! - [`open`]: escaping to open code and closing again
//! - [`registry`]: open-to-closed function substitution
//! - [`memory`] / [`effects`]: the hooks instrumented code calls
//!
//! # Example
//!
//! ```ignore
//! use txmem_engine::{transact, write, abort_transaction, TransactionResult};
//!
//! let mut x = 1u32;
//! let ptr: *mut u32 = &mut x;
//! let result = transact(|| {
//!     unsafe { write(&mut *ptr, 2) };
//!     abort_transaction();
//! });
//! assert_eq!(result, TransactionResult::AbortedByRequest);
//! assert_eq!(x, 1);
//! ```
//!
//! # Threads
//!
//! Every thread has its own context; nothing here is shared between
//! threads except the process-wide configuration, the conflict detector
//! and the function registry.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod context;
pub mod effects;
mod frame;
pub mod handlers;
pub mod memory;
pub mod open;
pub mod registry;
mod signal;
pub mod transact;
mod undo;
pub mod validation;

pub use effects::{
    on_abort, on_commit, pop_all_on_abort_handlers, pop_all_on_commit_handlers,
    pop_on_abort_handler, pop_on_commit_handler, push_on_abort_handler, push_on_commit_handler,
};
pub use handlers::HandlerKey;
pub use memory::{
    did_allocate, did_free, is_on_current_transaction_stack, record_open_write,
    record_open_write_no_memory_validation, record_open_write_typed, record_write,
    record_write_typed, write,
};
pub use open::{
    close, in_static_local_initializer, open, open_no_validation, open_with_validation,
    TransferFromOpen,
};
pub use registry::{
    closed_variant_of, register_open_to_closed_functions, resolve,
    unregister_open_to_closed_functions, FnPtr, OpenToClosedPair, OpenToClosedTable, TableHandle,
};
pub use transact::{
    abort_on_failed_lock_acquisition, abort_transaction, cascading_abort_transaction,
    cascading_abort_transaction_with, cascading_retry_transaction, clear_transaction_status,
    commit, commit_transaction, get_context_status, is_closed, is_committing_or_aborting,
    is_transactional, language_abort, rollback_transaction, start_transaction, transact,
    transaction_depth,
};
pub use txmem_core::{ContextStatus, MemoryValidationLevel, TransactionResult};
pub use validation::{
    conflict_detector, reset_validation_stats, set_conflict_detector, validation_stats,
    ConflictDetector, HashDetector, ValidationStats, WriteRange,
};
