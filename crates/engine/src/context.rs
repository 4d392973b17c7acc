//! Per-thread transaction context
//!
//! Each thread owns one [`TransactionContext`]: its stack of frames, the
//! status register, whether the running code is closed, and the stack of
//! open scopes used by memory validation.
//!
//! # Borrowing rule
//!
//! The context lives in a `RefCell`. Nothing that can run user code
//! (handlers, bodies, host callbacks that might re-enter the engine, or
//! drops of captured values) may run while it is borrowed. Methods here
//! hand handlers and frames back to the caller, which runs or drops them
//! after the borrow ends.

use crate::frame::{FrameKind, TransactionFrame};
use crate::handlers::{Handler, HandlerQueue};
use crate::validation::{OpenScope, ValidationMonitor, WriteRange};
use std::cell::RefCell;
use std::collections::BTreeSet;
use txmem_core::ContextStatus;

thread_local! {
    static CONTEXT: RefCell<TransactionContext> = RefCell::new(TransactionContext::new());
}

/// Run `f` with the calling thread's context
pub(crate) fn with_context<R>(f: impl FnOnce(&mut TransactionContext) -> R) -> R {
    CONTEXT.with(|cell| f(&mut cell.borrow_mut()))
}

/// Like [`with_context`], but `None` during thread teardown or re-entry
pub(crate) fn try_with_context<R>(f: impl FnOnce(&mut TransactionContext) -> R) -> Option<R> {
    CONTEXT
        .try_with(|cell| cell.try_borrow_mut().ok().map(|mut ctx| f(&mut ctx)))
        .ok()
        .flatten()
}

/// State taken out of a rolled-back frame
pub(crate) struct RolledBack {
    /// Abort handlers, newest first
    abort: Vec<Handler>,
    /// Commit handlers that will never run
    discarded: HandlerQueue,
}

impl RolledBack {
    /// Drop the discarded handlers, then run the abort handlers
    ///
    /// Must be called with the context released.
    pub(crate) fn run(self) {
        drop(self.discarded);
        for handler in self.abort {
            handler();
        }
    }
}

pub(crate) struct TransactionContext {
    pub(crate) frames: Vec<TransactionFrame>,
    pub(crate) status: ContextStatus,
    pub(crate) closed: bool,
    pub(crate) open_scopes: Vec<OpenScope>,
    pub(crate) cascade_work: Option<Handler>,
    pub(crate) monitor: ValidationMonitor,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("depth", &self.frames.len())
            .field("status", &self.status)
            .field("closed", &self.closed)
            .field("open_scopes", &self.open_scopes.len())
            .finish_non_exhaustive()
    }
}

impl TransactionContext {
    fn new() -> Self {
        TransactionContext {
            frames: Vec::new(),
            status: ContextStatus::Idle,
            closed: false,
            open_scopes: Vec::new(),
            cascade_work: None,
            monitor: ValidationMonitor::new(),
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Whether the running code is closed code of a live frame
    pub(crate) fn is_closed(&self) -> bool {
        self.closed && self.status == ContextStatus::OnTrack && !self.frames.is_empty()
    }

    pub(crate) fn top(&self) -> Option<&TransactionFrame> {
        self.frames.last()
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut TransactionFrame> {
        self.frames.last_mut()
    }

    /// Status to settle on once nothing is finishing
    fn resting_status(&self) -> ContextStatus {
        if self.frames.is_empty() {
            ContextStatus::Idle
        } else {
            ContextStatus::OnTrack
        }
    }

    /// Push a frame and enter closed code, returning its index
    pub(crate) fn push_frame(&mut self, kind: FrameKind, stack_marker: usize) -> usize {
        let frame = TransactionFrame::new(kind, stack_marker, self.closed);
        self.frames.push(frame);
        self.closed = true;
        self.status = ContextStatus::OnTrack;
        tracing::trace!(depth = self.frames.len(), ?kind, "frame pushed");
        self.frames.len() - 1
    }

    /// Pop the top frame, handing it back for dropping
    pub(crate) fn pop_frame(&mut self) -> Option<TransactionFrame> {
        let frame = self.frames.pop()?;
        self.closed = frame.resume_closed;
        self.status = self.resting_status();
        tracing::trace!(depth = self.frames.len(), "frame popped");
        Some(frame)
    }

    /// Drop frames at `index` and above without restoring memory
    pub(crate) fn discard_frames_from(&mut self, index: usize) -> Vec<TransactionFrame> {
        if self.frames.len() <= index {
            return Vec::new();
        }
        let discarded = self.frames.split_off(index);
        if let Some(bottom) = discarded.first() {
            self.closed = bottom.resume_closed;
        }
        self.status = self.resting_status();
        tracing::debug!(depth = index, count = discarded.len(), "frames discarded");
        discarded
    }

    /// Undo the top frame's writes and take its handlers
    ///
    /// The frame stays on the stack; the context is left open with
    /// `status` so that handlers run as open code.
    pub(crate) fn roll_back_top(&mut self, status: ContextStatus) -> RolledBack {
        self.status = status;
        self.closed = false;
        let depth = self.frames.len();
        let Some(frame) = self.frames.last_mut() else {
            return RolledBack {
                abort: Vec::new(),
                discarded: HandlerQueue::new(),
            };
        };
        tracing::debug!(depth, ?status, entries = frame.undo.len(), "rolling back frame");
        // SAFETY: the write hooks require recorded regions to stay valid
        // until the nest finishes
        unsafe { frame.undo.restore() };
        frame.validation.clear();
        frame.pending_commit_pops.clear();
        frame.pending_abort_pops.clear();
        RolledBack {
            abort: frame.abort_handlers.take_lifo(),
            discarded: std::mem::take(&mut frame.commit_handlers),
        }
    }

    /// Finalize the outermost frame's memory, returning commit handlers in
    /// FIFO order and the abort handlers that will never run
    pub(crate) fn begin_outermost_commit(&mut self) -> (Vec<Handler>, HandlerQueue) {
        self.status = ContextStatus::Committing;
        self.closed = false;
        match self.frames.last_mut() {
            Some(frame) => {
                tracing::debug!(
                    entries = frame.undo.len(),
                    handlers = frame.commit_handlers.len(),
                    "committing outermost frame"
                );
                frame.undo.discard();
                frame.validation.clear();
                (
                    frame.commit_handlers.take_fifo(),
                    std::mem::take(&mut frame.abort_handlers),
                )
            }
            None => (Vec::new(), HandlerQueue::new()),
        }
    }

    /// Merge the top frame into its parent
    pub(crate) fn commit_nested(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        self.closed = frame.resume_closed;
        let depth = self.frames.len();
        if let Some(parent) = self.frames.last_mut() {
            tracing::trace!(depth, entries = frame.undo.len(), "merging frame into parent");
            frame.merge_into(parent);
        }
        self.status = self.resting_status();
    }

    /// Union of every active frame's written ranges
    pub(crate) fn tracked_ranges(&self) -> BTreeSet<WriteRange> {
        self.frames
            .iter()
            .flat_map(|frame| frame.validation.iter().copied())
            .collect()
    }

    /// Forget a released block in every frame and open scope
    pub(crate) fn forget_block(&mut self, base: usize) {
        let len = self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.release_allocation(base))
            .unwrap_or(1);
        for frame in &mut self.frames {
            frame.forget_block(base, len);
        }
        for scope in &mut self.open_scopes {
            scope.forget_within(base, len);
        }
    }
}
