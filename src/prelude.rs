//! Convenient imports for txmem
//!
//! ```ignore
//! use txmem::prelude::*;
//!
//! let result = transact(|| on_commit(|| println!("done")));
//! assert_eq!(result, TransactionResult::Committed);
//! ```

// Transactions
pub use txmem_engine::{
    abort_transaction, cascading_abort_transaction, cascading_retry_transaction, commit,
    get_context_status, is_closed, is_transactional, rollback_transaction, transact,
};

// Open and closed code
pub use txmem_engine::{close, open, open_no_validation, open_with_validation, resolve};

// Memory hooks
pub use txmem_engine::{did_allocate, did_free, record_open_write, record_write, write};

// Deferred effects
pub use txmem_engine::{on_abort, on_commit, pop_on_abort_handler, pop_on_commit_handler};
pub use txmem_engine::{push_on_abort_handler, push_on_commit_handler, HandlerKey};

// Adaptors
pub use txmem_primitives::{TxMutex, TxPool, TxRc, TxWriter};

// Results and configuration
pub use txmem_core::{ContextStatus, MemoryValidationLevel, TransactionResult};
pub use txmem_runtime::config;
