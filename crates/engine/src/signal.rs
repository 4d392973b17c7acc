//! Abort signals carried by unwinding
//!
//! Aborting a frame owned by [`crate::transact`] unwinds the body back to
//! that `transact` call. The payload is an [`AbortSignal`] raised with
//! `resume_unwind`, so the panic hook never sees it.

use std::panic;
use txmem_core::ContextStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortSignal {
    Request,
    Language,
    CascadingAbort,
    CascadingRetry,
    FailedLockAcquisition,
}

impl AbortSignal {
    /// Status the context holds while the frames unwind
    pub(crate) fn status(self) -> ContextStatus {
        match self {
            AbortSignal::Request => ContextStatus::AbortedByRequest,
            AbortSignal::Language => ContextStatus::AbortedByLanguage,
            AbortSignal::CascadingAbort => ContextStatus::AbortedByCascadingAbort,
            AbortSignal::CascadingRetry => ContextStatus::AbortedByCascadingRetry,
            AbortSignal::FailedLockAcquisition => ContextStatus::AbortedByFailedLockAcquisition,
        }
    }

    /// Whether the signal travels past the innermost scoped frame
    pub(crate) fn is_cascading(self) -> bool {
        self.status().is_cascading()
    }

    pub(crate) fn raise(self) -> ! {
        tracing::trace!(signal = ?self, "raising abort");
        panic::resume_unwind(Box::new(self))
    }

    pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Option<Self> {
        payload.downcast_ref::<AbortSignal>().copied()
    }
}
