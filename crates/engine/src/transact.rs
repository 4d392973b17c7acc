//! Starting, committing and aborting transactions
//!
//! [`transact`] pushes a frame, runs the body as closed code and finishes
//! the frame according to how the body ended:
//!
//! | Body ended with | Result |
//! |-----------------|--------|
//! | normal return | frame commits (outermost) or merges into its parent |
//! | [`abort_transaction`] | frame rolled back, `AbortedByRequest` |
//! | [`rollback_transaction`] then return | `AbortedByRequest` |
//! | [`cascading_abort_transaction`] | every frame rolled back, `AbortedByCascade` at the outermost |
//! | [`cascading_retry_transaction`] | every frame rolled back, outermost body rerun |
//! | [`language_abort`] with `InternalAbortAction::Abort` | frame rolled back, `AbortedByLanguage` |
//! | any other panic | every frame of the body rolled back, panic resumed |
//!
//! Aborts that leave the body do so by unwinding to the owning `transact`.

use crate::context::{try_with_context, with_context};
use crate::frame::FrameKind;
use crate::handlers::Handler;
use crate::signal::AbortSignal;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use txmem_core::{ContextStatus, InternalAbortAction, TransactionResult};
use txmem_runtime::{config, fatal, host_ensure, host_log, Severity};

/// Run `body` as a transaction
///
/// Calling `transact` from an on-commit handler returns
/// `AbortedByTransactInOnCommit`, and from an on-abort handler or
/// post-abort work `AbortedByTransactInOnAbort`, without running `body`.
///
/// Outside any transaction, when the engine is disabled or the enabled
/// probability roll fails, `body` runs once without instrumentation and the
/// result is `Committed`.
pub fn transact<F>(mut body: F) -> TransactionResult
where
    F: FnMut(),
{
    let (status, depth, closed) = with_context(|ctx| (ctx.status, ctx.depth(), ctx.closed));
    match status {
        ContextStatus::Committing => return TransactionResult::AbortedByTransactInOnCommit,
        ContextStatus::InPostAbort => return TransactionResult::AbortedByTransactInOnAbort,
        s if s.is_aborting() => return TransactionResult::AbortedByTransactInOnAbort,
        ContextStatus::InStaticLocalInitializer => {
            body();
            return TransactionResult::Committed;
        }
        _ => {}
    }

    if depth == 0 {
        if !config().should_run_transactionally() {
            tracing::trace!("engine disabled, running body directly");
            body();
            return TransactionResult::Committed;
        }
        return run_transaction(&mut body);
    }

    if !closed {
        // Entered from open code: the new frame runs closed
        let mut result = TransactionResult::Committed;
        crate::open::close(|| result = run_transaction(&mut body));
        return result;
    }
    run_transaction(&mut body)
}

/// Run `body` as a transaction that must commit
///
/// Any other result is fatal.
pub fn commit<F>(body: F)
where
    F: FnMut(),
{
    let result = transact(body);
    if !result.is_committed() {
        fatal!("transaction was expected to commit but finished with {}", result);
    }
}

enum Step {
    Done(TransactionResult),
    Rerun,
}

/// Discards any frames left above `index` if a handler panics
struct FrameGuard {
    index: usize,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let index = self.index;
        let frames = try_with_context(|ctx| ctx.discard_frames_from(index));
        drop(frames);
    }
}

// Addresses below `anchor` belong to the body; the frame marker relies on
// this function keeping its own stack frame.
#[inline(never)]
fn run_transaction(body: &mut dyn FnMut()) -> TransactionResult {
    let anchor = 0u8;
    let stack_marker = std::hint::black_box(&anchor) as *const u8 as usize;
    let mut retried = false;
    loop {
        let index = with_context(|ctx| ctx.push_frame(FrameKind::Scoped, stack_marker));
        let guard = FrameGuard { index };
        let step = match panic::catch_unwind(AssertUnwindSafe(|| body())) {
            Ok(()) => finish_body(index, &mut retried),
            Err(payload) => finish_unwind(index, payload),
        };
        drop(guard);
        match step {
            Step::Done(result) => {
                tracing::trace!(depth = index, %result, "transaction finished");
                return result;
            }
            Step::Rerun => continue,
        }
    }
}

fn finish_body(index: usize, retried: &mut bool) -> Step {
    let (status, depth) = with_context(|ctx| (ctx.status, ctx.depth()));
    if status == ContextStatus::AbortedByRequest {
        abort_frames_from(index, ContextStatus::AbortedByRequest);
        return Step::Done(TransactionResult::AbortedByRequest);
    }
    host_ensure!(
        depth == index + 1,
        "transaction body returned with {} unfinished manual transaction(s)",
        depth.saturating_sub(index + 1)
    );
    if !*retried && config().retry_policy().retries_at_depth(index) {
        *retried = true;
        tracing::debug!(depth = index, "forcing retry");
        abort_frames_from(index, ContextStatus::AbortedByRequest);
        return Step::Rerun;
    }
    if index == 0 {
        commit_outermost();
    } else {
        with_context(|ctx| ctx.commit_nested());
    }
    Step::Done(TransactionResult::Committed)
}

fn finish_unwind(index: usize, payload: Box<dyn Any + Send>) -> Step {
    let Some(signal) = AbortSignal::from_payload(&*payload) else {
        tracing::debug!(depth = index, "panic escaped transaction body, rolling back");
        abort_frames_from(index, ContextStatus::AbortedByLanguage);
        panic::resume_unwind(payload);
    };
    let status = signal.status();
    if signal.is_cascading() && index > 0 {
        abort_frames_from(index, status);
        panic::resume_unwind(payload);
    }

    abort_frames_from(index + 1, status);
    let rolled = with_context(|ctx| ctx.roll_back_top(status));
    rolled.run();

    match signal {
        AbortSignal::Request => {
            pop_frame();
            Step::Done(TransactionResult::AbortedByRequest)
        }
        AbortSignal::Language => {
            pop_frame();
            Step::Done(TransactionResult::AbortedByLanguage)
        }
        AbortSignal::CascadingAbort => {
            run_post_abort_work();
            pop_frame();
            Step::Done(TransactionResult::AbortedByCascade)
        }
        AbortSignal::CascadingRetry => {
            run_post_abort_work();
            pop_frame();
            tracing::debug!("retrying cascaded transaction");
            Step::Rerun
        }
        AbortSignal::FailedLockAcquisition => {
            pop_frame();
            tracing::debug!("lock acquisition failed, retrying transaction");
            std::thread::yield_now();
            Step::Rerun
        }
    }
}

fn commit_outermost() {
    let (handlers, discarded) = with_context(|ctx| ctx.begin_outermost_commit());
    drop(discarded);
    for handler in handlers {
        handler();
    }
    pop_frame();
}

fn pop_frame() {
    let frame = with_context(|ctx| ctx.pop_frame());
    drop(frame);
}

/// Roll back and pop every frame at `index` and above, innermost first
fn abort_frames_from(index: usize, status: ContextStatus) {
    while with_context(|ctx| ctx.depth()) > index {
        let rolled = with_context(|ctx| ctx.roll_back_top(status));
        rolled.run();
        pop_frame();
    }
}

fn run_post_abort_work() {
    let work = with_context(|ctx| {
        let work = ctx.cascade_work.take();
        if work.is_some() {
            ctx.status = ContextStatus::InPostAbort;
        }
        work
    });
    if let Some(work) = work {
        work();
    }
}

// ============================================================================
// Manual frames
// ============================================================================

/// Push a nested frame finished by an explicit call
///
/// Must be called from a live nest; starting a nest is `transact`'s job.
#[inline(never)]
pub fn start_transaction() {
    let anchor = 0u8;
    let stack_marker = std::hint::black_box(&anchor) as *const u8 as usize;
    let pushed = with_context(|ctx| {
        if ctx.in_transaction() && ctx.status == ContextStatus::OnTrack {
            ctx.push_frame(FrameKind::Manual, stack_marker);
            true
        } else {
            false
        }
    });
    host_ensure!(pushed, "start_transaction requires an active transaction");
}

/// Commit the frame pushed by [`start_transaction`] into its parent
pub fn commit_transaction() -> TransactionResult {
    let top = with_context(|ctx| (ctx.top().map(|f| f.kind), ctx.status));
    match top {
        (Some(FrameKind::Manual), ContextStatus::OnTrack) => {
            with_context(|ctx| ctx.commit_nested());
            TransactionResult::Committed
        }
        (kind, status) => fatal!(
            "commit_transaction needs a manual frame on top (found {:?}, status {:?})",
            kind,
            status
        ),
    }
}

/// Abort the innermost frame
///
/// A frame pushed by [`start_transaction`] is rolled back and popped in
/// place, and `AbortedByRequest` is returned. A frame owned by
/// [`transact`] unwinds to it instead, so this call does not return.
pub fn abort_transaction() -> ContextStatus {
    let top = with_context(|ctx| (ctx.top().map(|f| f.kind), ctx.status));
    match top {
        (Some(kind), ContextStatus::OnTrack | ContextStatus::AbortedByRequest) => match kind {
            FrameKind::Manual => {
                abort_top_in_place();
                pop_frame();
                ContextStatus::AbortedByRequest
            }
            FrameKind::Scoped => AbortSignal::Request.raise(),
        },
        (None, _) => fatal!("abort_transaction called outside a transaction"),
        (Some(_), status) => fatal!("abort_transaction called while {:?}", status),
    }
}

/// Undo the innermost frame now, without unwinding
///
/// The status stays `AbortedByRequest` until the frame finishes or
/// [`clear_transaction_status`] is called; the owning `transact` then
/// returns `AbortedByRequest`. A manual frame is also popped.
pub fn rollback_transaction() -> TransactionResult {
    let top = with_context(|ctx| (ctx.top().map(|f| f.kind), ctx.status));
    match top {
        (Some(kind), ContextStatus::OnTrack | ContextStatus::AbortedByRequest) => {
            abort_top_in_place();
            if kind == FrameKind::Manual {
                pop_frame();
            }
            TransactionResult::AbortedByRequest
        }
        (None, _) => fatal!("rollback_transaction called outside a transaction"),
        (Some(_), status) => fatal!("rollback_transaction called while {:?}", status),
    }
}

fn abort_top_in_place() {
    let (rolled, closed) = with_context(|ctx| {
        let closed = ctx.closed;
        (ctx.roll_back_top(ContextStatus::AbortedByRequest), closed)
    });
    rolled.run();
    with_context(|ctx| ctx.closed = closed);
}

/// Abort every frame of the nest
pub fn cascading_abort_transaction() -> ! {
    raise_cascade(AbortSignal::CascadingAbort, None)
}

/// Abort every frame of the nest, then run `after_abort` as open code
/// before the outermost `transact` returns `AbortedByCascade`
pub fn cascading_abort_transaction_with<F>(after_abort: F) -> !
where
    F: FnOnce() + 'static,
{
    raise_cascade(AbortSignal::CascadingAbort, Some(Box::new(after_abort)))
}

/// Abort every frame of the nest, run `before_retry`, then rerun the
/// outermost body
pub fn cascading_retry_transaction<F>(before_retry: F) -> !
where
    F: FnOnce() + 'static,
{
    raise_cascade(AbortSignal::CascadingRetry, Some(Box::new(before_retry)))
}

/// Give up on a lock held elsewhere: abort the nest and retry it
pub fn abort_on_failed_lock_acquisition() -> ! {
    raise_cascade(AbortSignal::FailedLockAcquisition, None)
}

fn raise_cascade(signal: AbortSignal, work: Option<Handler>) -> ! {
    let state = with_context(|ctx| (ctx.in_transaction(), ctx.status));
    match state {
        (true, ContextStatus::OnTrack) => {
            with_context(|ctx| ctx.cascade_work = work);
            signal.raise()
        }
        (false, _) => fatal!("{:?} raised outside a transaction", signal),
        (true, status) => fatal!("{:?} raised while {:?}", signal, status),
    }
}

/// Report an operation closed code cannot perform
///
/// With [`InternalAbortAction::Crash`] this is fatal. With
/// [`InternalAbortAction::Abort`] the innermost `transact` returns
/// `AbortedByLanguage`.
pub fn language_abort(reason: &str) -> ! {
    let in_transaction = try_with_context(|ctx| ctx.in_transaction()).unwrap_or(false);
    match config().internal_abort_action() {
        InternalAbortAction::Abort if in_transaction => {
            host_log!(Severity::Warning, "aborting transaction: {}", reason);
            AbortSignal::Language.raise()
        }
        _ => fatal!("unsupported operation in closed code: {}", reason),
    }
}

/// Reset the status after an in-place rollback so the frame continues
pub fn clear_transaction_status() {
    with_context(|ctx| {
        if ctx.in_transaction() {
            ctx.status = ContextStatus::OnTrack;
        } else {
            ctx.status = ContextStatus::Idle;
        }
    });
}

// ============================================================================
// Queries
// ============================================================================

/// Status of the calling thread's context
pub fn get_context_status() -> ContextStatus {
    try_with_context(|ctx| ctx.status).unwrap_or(ContextStatus::Idle)
}

/// Whether any frame is active on this thread
pub fn is_transactional() -> bool {
    try_with_context(|ctx| ctx.in_transaction()).unwrap_or(false)
}

/// Whether the calling code runs closed inside a live frame
pub fn is_closed() -> bool {
    try_with_context(|ctx| ctx.is_closed()).unwrap_or(false)
}

/// Whether a frame is currently committing or aborting
pub fn is_committing_or_aborting() -> bool {
    get_context_status().is_committing_or_aborting()
}

/// Current nesting depth (0 outside transactions)
pub fn transaction_depth() -> usize {
    try_with_context(|ctx| ctx.depth()).unwrap_or(0)
}
