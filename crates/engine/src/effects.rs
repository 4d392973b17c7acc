//! On-commit and on-abort handlers
//!
//! In closed code, handlers attach to the innermost frame. Outside closed
//! code there is no frame to attach to: on-commit work runs immediately
//! and on-abort work is dropped.

use crate::context::try_with_context;
use crate::handlers::{Handler, HandlerKey, PendingPop};

#[derive(Clone, Copy)]
enum Queue {
    Commit,
    Abort,
}

/// Attach `work` to the innermost closed frame, or hand it back
fn attach(queue: Queue, key: Option<HandlerKey>, work: Handler) -> Option<Handler> {
    let mut slot = Some(work);
    try_with_context(|ctx| {
        if !ctx.is_closed() {
            return;
        }
        let Some(frame) = ctx.top_mut() else {
            return;
        };
        if let Some(work) = slot.take() {
            match queue {
                Queue::Commit => frame.commit_handlers.push(key, work),
                Queue::Abort => frame.abort_handlers.push(key, work),
            }
        }
    });
    slot
}

fn detach(queue: Queue, pop: PendingPop) {
    try_with_context(|ctx| {
        if !ctx.is_closed() {
            return;
        }
        let Some(frame) = ctx.top_mut() else {
            return;
        };
        let (handlers, pending) = match queue {
            Queue::Commit => (&mut frame.commit_handlers, &mut frame.pending_commit_pops),
            Queue::Abort => (&mut frame.abort_handlers, &mut frame.pending_abort_pops),
        };
        match pop {
            PendingPop::One(key) => {
                if !handlers.pop(key) {
                    pending.push(pop);
                }
            }
            PendingPop::All(key) => {
                handlers.pop_all(key);
                pending.push(pop);
            }
        }
    });
}

/// Run `work` once the whole nest commits
///
/// Outside closed code `work` runs now.
pub fn on_commit<F>(work: F)
where
    F: FnOnce() + 'static,
{
    if let Some(work) = attach(Queue::Commit, None, Box::new(work)) {
        work();
    }
}

/// Run `work` if the innermost frame aborts
///
/// Outside closed code this does nothing.
pub fn on_abort<F>(work: F)
where
    F: FnOnce() + 'static,
{
    drop(attach(Queue::Abort, None, Box::new(work)));
}

/// Keyed [`on_commit`], cancellable with [`pop_on_commit_handler`]
pub fn push_on_commit_handler<F>(key: HandlerKey, work: F)
where
    F: FnOnce() + 'static,
{
    if let Some(work) = attach(Queue::Commit, Some(key), Box::new(work)) {
        work();
    }
}

/// Keyed [`on_abort`], cancellable with [`pop_on_abort_handler`]
pub fn push_on_abort_handler<F>(key: HandlerKey, work: F)
where
    F: FnOnce() + 'static,
{
    drop(attach(Queue::Abort, Some(key), Box::new(work)));
}

/// Cancel the most recent on-commit handler pushed with `key`
///
/// If the innermost frame holds none, the pop is applied to its parent
/// when the frame commits.
pub fn pop_on_commit_handler(key: HandlerKey) {
    detach(Queue::Commit, PendingPop::One(key));
}

/// Cancel every on-commit handler pushed with `key` in this nest
pub fn pop_all_on_commit_handlers(key: HandlerKey) {
    detach(Queue::Commit, PendingPop::All(key));
}

/// Cancel the most recent on-abort handler pushed with `key`
pub fn pop_on_abort_handler(key: HandlerKey) {
    detach(Queue::Abort, PendingPop::One(key));
}

/// Cancel every on-abort handler pushed with `key` in this nest
pub fn pop_all_on_abort_handlers(key: HandlerKey) {
    detach(Queue::Abort, PendingPop::All(key));
}
