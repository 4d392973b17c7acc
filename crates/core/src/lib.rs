//! Core types for the txmem transactional memory runtime
//!
//! This crate defines the vocabulary shared by every other txmem crate:
//! - [`TransactionResult`], [`ContextStatus`], [`MemoryValidationLevel`]:
//!   ABI-stable outcome and mode enumerations
//! - [`EnablementState`], [`RetryPolicy`], [`InternalAbortAction`]:
//!   process-wide configuration knobs
//! - [`AbiLayout`]: the layout descriptor checked at initialization
//! - [`Error`]: host-contract and configuration errors
//!
//! Transaction outcomes are never errors. They travel as plain result
//! codes so that independently compiled modules can agree on them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abi;
pub mod error;
pub mod settings;
pub mod types;

pub use abi::{check_abi, AbiLayout, TypeLayout, ABI_VERSION};
pub use error::{Error, Result};
pub use settings::{EnablementState, EnablementTier, InternalAbortAction, RetryPolicy};
pub use types::{ContextStatus, MemoryValidationLevel, TransactionResult};
