//! Transaction-aware building blocks for txmem
//!
//! Each type here keeps its side effects consistent with the nest it is
//! used from:
//!
//! - [`TxMutex`]: locks taken in closed code are held until the nest ends
//! - [`TxPool`]: fixed-size blocks, reclaimed on abort, freed on commit
//! - [`TxWriter`]: output buffered until commit, discarded on abort
//! - [`TxRc`]: reference counts whose decrements wait for commit
//!
//! Outside closed code they behave like their ordinary counterparts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mutex;
pub mod pool;
pub mod rc;
pub mod writer;

pub use mutex::{TxMutex, TxMutexGuard};
pub use pool::TxPool;
pub use rc::TxRc;
pub use writer::TxWriter;
