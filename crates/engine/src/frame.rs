//! Transaction frames
//!
//! A frame is one nesting level. It owns the undo log, validation record
//! and handler queues for everything done while it is the innermost frame.
//! When a nested frame commits, [`TransactionFrame::merge_into`] moves all
//! of that state into the parent so an ancestor abort can still undo it.

use crate::handlers::{apply_pending_pops, HandlerQueue, PendingPop};
use crate::undo::UndoLog;
use crate::validation::{ValidationRecord, WriteRange};
use std::collections::BTreeMap;

/// How a frame was opened, which decides how it is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// Pushed by `transact`; finished when the body returns or unwinds
    Scoped,
    /// Pushed by `start_transaction`; finished by an explicit call
    Manual,
}

#[derive(Debug)]
pub(crate) struct TransactionFrame {
    pub(crate) kind: FrameKind,
    pub(crate) undo: UndoLog,
    pub(crate) validation: ValidationRecord,
    pub(crate) commit_handlers: HandlerQueue,
    pub(crate) abort_handlers: HandlerQueue,
    pub(crate) pending_commit_pops: Vec<PendingPop>,
    pub(crate) pending_abort_pops: Vec<PendingPop>,
    /// Blocks allocated while this frame was innermost: base -> length
    allocations: BTreeMap<usize, usize>,
    /// Address inside the stack frame that opened this frame
    pub(crate) stack_marker: usize,
    /// Lowest stack address seen by a write recorded here or in a merged
    /// child; everything between it and `stack_marker` is this body's stack
    stack_low: usize,
    /// Whether the context was closed before this frame was pushed
    pub(crate) resume_closed: bool,
}

impl TransactionFrame {
    pub(crate) fn new(kind: FrameKind, stack_marker: usize, resume_closed: bool) -> Self {
        TransactionFrame {
            kind,
            undo: UndoLog::new(),
            validation: ValidationRecord::new(),
            commit_handlers: HandlerQueue::new(),
            abort_handlers: HandlerQueue::new(),
            pending_commit_pops: Vec::new(),
            pending_abort_pops: Vec::new(),
            allocations: BTreeMap::new(),
            stack_marker,
            stack_low: usize::MAX,
            resume_closed,
        }
    }

    pub(crate) fn note_allocation(&mut self, base: usize, len: usize) {
        if len > 0 {
            self.allocations.insert(base, len);
        }
    }

    pub(crate) fn release_allocation(&mut self, base: usize) -> Option<usize> {
        self.allocations.remove(&base)
    }

    /// Whether the range lies inside a block allocated by this frame
    pub(crate) fn is_fresh(&self, range: &WriteRange) -> bool {
        self.allocations
            .range(..=range.address)
            .next_back()
            .map_or(false, |(base, len)| range.end() <= base + len)
    }

    pub(crate) fn note_stack_probe(&mut self, probe: usize) {
        self.stack_low = self.stack_low.min(probe);
    }

    /// Forget everything this frame knows about a released block
    pub(crate) fn forget_block(&mut self, base: usize, len: usize) {
        self.validation.remove_within(base, len);
        self.undo.forget_range(base, len);
    }

    /// Move this committed frame's state into its parent
    ///
    /// Writes the child recorded into the parent body's own stack are
    /// dropped: the parent never records that stack itself, and it is
    /// gone by the time the parent finishes.
    pub(crate) fn merge_into(mut self, parent: &mut TransactionFrame) {
        let low = self.stack_low.min(parent.stack_low);
        parent.stack_low = low;
        if low < parent.stack_marker {
            let base = low + 1;
            let len = parent.stack_marker - base;
            self.undo.forget_range(base, len);
            self.validation.remove_within(base, len);
        }
        apply_pending_pops(
            std::mem::take(&mut self.pending_commit_pops),
            &mut parent.commit_handlers,
            &mut parent.pending_commit_pops,
        );
        apply_pending_pops(
            std::mem::take(&mut self.pending_abort_pops),
            &mut parent.abort_handlers,
            &mut parent.pending_abort_pops,
        );
        parent.commit_handlers.append(&mut self.commit_handlers);
        parent.abort_handlers.append(&mut self.abort_handlers);
        parent.undo.append(self.undo);
        parent.validation.append(self.validation);
        parent.allocations.append(&mut self.allocations);
    }
}
