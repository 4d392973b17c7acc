//! Error types for host-contract and configuration failures
//!
//! Transaction outcomes are reported through [`crate::TransactionResult`]
//! and [`crate::ContextStatus`], never through this type.

use crate::settings::EnablementState;
use thiserror::Error;

/// All txmem configuration and host-contract errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A required host callback was not supplied
    #[error("missing required host callback: {0}")]
    MissingCallback(&'static str),

    /// The caller was compiled against a different enum layout
    #[error("ABI mismatch in {field}: runtime has {runtime}, caller has {caller}")]
    AbiMismatch {
        /// Layout field that differs
        field: &'static str,
        /// Value compiled into the runtime
        runtime: String,
        /// Value compiled into the caller
        caller: String,
    },

    /// The current enablement state outranks the requested one
    #[error("enablement state {current:?} cannot be replaced by {requested:?}")]
    EnablementLocked {
        /// State in effect
        current: EnablementState,
        /// State that was rejected
        requested: EnablementState,
    },

    /// Probability outside 0..=100
    #[error("enabled probability must be within 0..=100, got {0}")]
    InvalidProbability(f32),
}

/// Result type for txmem configuration operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Host-contract errors can never be recovered from
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MissingCallback(_) | Error::AbiMismatch { .. })
    }
}
