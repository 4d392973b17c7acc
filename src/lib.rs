//! # txmem
//!
//! Software transactional memory runtime for instrumented code.
//!
//! Code run inside [`transact`] is *closed*: it reports the memory it is
//! about to overwrite and defers its side effects through on-commit and
//! on-abort handlers. If the transaction aborts, every reported write is
//! undone and the on-abort handlers run; if it commits, the on-commit
//! handlers run. Transactions nest, and [`open`] escapes to ordinary code
//! whose writes to transactional memory are checked on the way back.
//!
//! ## Quick Start
//!
//! ```ignore
//! use txmem::prelude::*;
//!
//! let mut balance = 100u64;
//! let ptr: *mut u64 = &mut balance;
//!
//! let result = transact(|| unsafe {
//!     write(&mut *ptr, 40);
//!     on_commit(|| println!("withdrawal committed"));
//!     if *ptr < 50 {
//!         abort_transaction();
//!     }
//! });
//! assert_eq!(result, TransactionResult::AbortedByRequest);
//! assert_eq!(balance, 100);
//! ```
//!
//! ## Crates
//!
//! - [`txmem_core`]: result and status enums, settings enums, ABI layout check
//! - [`txmem_runtime`]: host callbacks, process-wide configuration, diagnostics
//! - [`txmem_engine`]: frames, undo log, validation, handlers, open/closed
//! - [`txmem_primitives`]: transaction-aware mutex, pool, writer and pointer

#![warn(missing_docs)]

pub mod prelude;

pub use txmem_core;
pub use txmem_engine;
pub use txmem_primitives;
pub use txmem_runtime;

pub use txmem_core::{
    AbiLayout, ContextStatus, EnablementState, Error, InternalAbortAction, MemoryValidationLevel,
    Result, RetryPolicy, TransactionResult,
};
pub use txmem_engine::{
    abort_transaction, close, commit, on_abort, on_commit, open, rollback_transaction, transact,
    write,
};
pub use txmem_runtime::{config, initialize, HostCallbacks, RuntimeSettings};
