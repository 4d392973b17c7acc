//! Result and status enumerations
//!
//! These enums cross module boundaries as small integers. Their
//! discriminants are frozen: the first variant is zero and new variants
//! may only be appended.
//!
//! | Enum | Repr | Variants |
//! |------|------|----------|
//! | [`TransactionResult`] | `u8` | 6 |
//! | [`ContextStatus`] | `u8` | 10 |
//! | [`MemoryValidationLevel`] | `u8` | 4 |

use serde::{Deserialize, Serialize};

/// Outcome of a call to `transact`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionResult {
    /// The body called `abort_transaction` or `rollback_transaction`
    AbortedByRequest = 0,
    /// The body hit a construct the engine cannot run transactionally
    AbortedByLanguage = 1,
    /// All writes and deferred effects were applied
    Committed = 2,
    /// `transact` was called from inside an on-commit handler
    AbortedByTransactInOnCommit = 3,
    /// `transact` was called from inside an on-abort handler
    AbortedByTransactInOnAbort = 4,
    /// A cascading abort unwound every enclosing frame
    AbortedByCascade = 5,
}

impl TransactionResult {
    /// Number of variants, used by the ABI layout check
    pub const VARIANT_COUNT: u8 = 6;

    /// Decode a raw discriminant
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TransactionResult::AbortedByRequest),
            1 => Some(TransactionResult::AbortedByLanguage),
            2 => Some(TransactionResult::Committed),
            3 => Some(TransactionResult::AbortedByTransactInOnCommit),
            4 => Some(TransactionResult::AbortedByTransactInOnAbort),
            5 => Some(TransactionResult::AbortedByCascade),
            _ => None,
        }
    }

    /// Raw discriminant
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    /// True only for [`TransactionResult::Committed`]
    pub const fn is_committed(self) -> bool {
        matches!(self, TransactionResult::Committed)
    }

    /// Stable name for logs
    pub const fn name(self) -> &'static str {
        match self {
            TransactionResult::AbortedByRequest => "AbortedByRequest",
            TransactionResult::AbortedByLanguage => "AbortedByLanguage",
            TransactionResult::Committed => "Committed",
            TransactionResult::AbortedByTransactInOnCommit => "AbortedByTransactInOnCommit",
            TransactionResult::AbortedByTransactInOnAbort => "AbortedByTransactInOnAbort",
            TransactionResult::AbortedByCascade => "AbortedByCascade",
        }
    }
}

impl std::fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Status register of a thread's transaction context
///
/// `Idle` holds exactly when the thread has no active frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextStatus {
    /// No transaction on this thread
    Idle = 0,
    /// A transaction is running normally
    OnTrack = 1,
    /// A lock could not be taken; the nest is being retried
    AbortedByFailedLockAcquisition = 2,
    /// An unsupported construct aborted the frame
    AbortedByLanguage = 3,
    /// The frame is being aborted on request
    AbortedByRequest = 4,
    /// The outermost frame is committing and running on-commit handlers
    Committing = 5,
    /// A cascading abort is unwinding every frame
    AbortedByCascadingAbort = 6,
    /// A cascading retry is unwinding every frame
    AbortedByCascadingRetry = 7,
    /// A static local is being initialized from transactional code
    InStaticLocalInitializer = 8,
    /// Post-abort work of a cascade is running
    InPostAbort = 9,
}

impl ContextStatus {
    /// Number of variants, used by the ABI layout check
    pub const VARIANT_COUNT: u8 = 10;

    /// Decode a raw discriminant
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ContextStatus::Idle),
            1 => Some(ContextStatus::OnTrack),
            2 => Some(ContextStatus::AbortedByFailedLockAcquisition),
            3 => Some(ContextStatus::AbortedByLanguage),
            4 => Some(ContextStatus::AbortedByRequest),
            5 => Some(ContextStatus::Committing),
            6 => Some(ContextStatus::AbortedByCascadingAbort),
            7 => Some(ContextStatus::AbortedByCascadingRetry),
            8 => Some(ContextStatus::InStaticLocalInitializer),
            9 => Some(ContextStatus::InPostAbort),
            _ => None,
        }
    }

    /// Raw discriminant
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    /// True for every `AbortedBy*` status
    pub const fn is_aborting(self) -> bool {
        matches!(
            self,
            ContextStatus::AbortedByFailedLockAcquisition
                | ContextStatus::AbortedByLanguage
                | ContextStatus::AbortedByRequest
                | ContextStatus::AbortedByCascadingAbort
                | ContextStatus::AbortedByCascadingRetry
        )
    }

    /// True while a frame is being finalized either way
    pub const fn is_committing_or_aborting(self) -> bool {
        self.is_aborting()
            || matches!(self, ContextStatus::Committing | ContextStatus::InPostAbort)
    }

    /// True for statuses produced by a cascade
    pub const fn is_cascading(self) -> bool {
        matches!(
            self,
            ContextStatus::AbortedByCascadingAbort
                | ContextStatus::AbortedByCascadingRetry
                | ContextStatus::AbortedByFailedLockAcquisition
        )
    }
}

impl std::fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Severity applied to a memory-validation conflict
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemoryValidationLevel {
    /// Defer to the process-wide setting (which itself resolves to `Error`)
    #[default]
    Default = 0,
    /// No validation
    Disabled = 1,
    /// Log the conflict and continue
    Warn = 2,
    /// Treat the conflict as a fatal fault
    Error = 3,
}

impl MemoryValidationLevel {
    /// Number of variants, used by the ABI layout check
    pub const VARIANT_COUNT: u8 = 4;

    /// Decode a raw discriminant
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(MemoryValidationLevel::Default),
            1 => Some(MemoryValidationLevel::Disabled),
            2 => Some(MemoryValidationLevel::Warn),
            3 => Some(MemoryValidationLevel::Error),
            _ => None,
        }
    }

    /// Raw discriminant
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    /// Replace `Default` with `fallback`
    ///
    /// A `Default` fallback resolves to `Error`.
    pub const fn resolve(self, fallback: MemoryValidationLevel) -> MemoryValidationLevel {
        match self {
            MemoryValidationLevel::Default => match fallback {
                MemoryValidationLevel::Default => MemoryValidationLevel::Error,
                other => other,
            },
            other => other,
        }
    }
}
