//! Open and closed execution
//!
//! Inside a transaction, code runs closed: tracked writes are undone on
//! abort and effects are deferred. [`open`] escapes to open code whose
//! effects are real; [`close`] goes back to closed code from inside an open
//! scope.
//!
//! Entering an open scope from closed code starts memory validation for it
//! (see [`crate::validation`]); leaving it checks for conflicts.

use crate::context::{try_with_context, with_context};
use crate::validation::{conflict_detector, log_stats, report_conflicts, OpenScope, WriteRange};
use std::time::Instant;
use txmem_core::{ContextStatus, MemoryValidationLevel};
use txmem_runtime::{config, fatal};

// ============================================================================
// Values leaving open code
// ============================================================================

/// Values that may be returned from [`open`] into closed code
///
/// A value produced by open code is handed to the closed caller through
/// [`TransferFromOpen::transfer_from_open`]. Plain data transfers as is;
/// types that own transactional state implement the trait to adapt
/// themselves.
pub trait TransferFromOpen: Sized {
    /// Turn a value produced by open code into one closed code may hold
    fn transfer_from_open(value: Self) -> Self;
}

macro_rules! transfer_as_is {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TransferFromOpen for $ty {
                #[inline]
                fn transfer_from_open(value: Self) -> Self {
                    value
                }
            }
        )*
    };
}

transfer_as_is!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
);

impl<T: ?Sized> TransferFromOpen for *const T {
    #[inline]
    fn transfer_from_open(value: Self) -> Self {
        value
    }
}

impl<T: ?Sized> TransferFromOpen for *mut T {
    #[inline]
    fn transfer_from_open(value: Self) -> Self {
        value
    }
}

impl<T: ?Sized> TransferFromOpen for std::ptr::NonNull<T> {
    #[inline]
    fn transfer_from_open(value: Self) -> Self {
        value
    }
}

impl<T: TransferFromOpen> TransferFromOpen for Option<T> {
    #[inline]
    fn transfer_from_open(value: Self) -> Self {
        value.map(T::transfer_from_open)
    }
}

// ============================================================================
// Open scopes
// ============================================================================

/// Run `f` as open code, validated at the configured level
///
/// `f` runs exactly once. Outside closed code this is a plain call.
pub fn open<R, F>(f: F) -> R
where
    R: TransferFromOpen,
    F: FnOnce() -> R,
{
    open_with_validation(MemoryValidationLevel::Default, f)
}

/// Run `f` as open code without memory validation
///
/// For code that legitimately touches transactionally written memory.
pub fn open_no_validation<R, F>(f: F) -> R
where
    R: TransferFromOpen,
    F: FnOnce() -> R,
{
    open_with_validation(MemoryValidationLevel::Disabled, f)
}

/// Run `f` as open code validated at `level`
///
/// `MemoryValidationLevel::Default` means the configured level.
pub fn open_with_validation<R, F>(level: MemoryValidationLevel, f: F) -> R
where
    R: TransferFromOpen,
    F: FnOnce() -> R,
{
    if !enter_open(level) {
        return f();
    }
    let mut scope = OpenScopeGuard { armed: true };
    let value = f();
    scope.armed = false;
    exit_open();
    R::transfer_from_open(value)
}

/// Pops the open scope when `f` unwinds
struct OpenScopeGuard {
    armed: bool,
}

impl Drop for OpenScopeGuard {
    fn drop(&mut self) {
        if self.armed {
            try_with_context(|ctx| {
                ctx.open_scopes.pop();
                ctx.closed = true;
            });
        }
    }
}

fn enter_open(level: MemoryValidationLevel) -> bool {
    let cfg = config();
    let level = level.resolve(cfg.effective_memory_validation_level());
    let throttling = cfg.memory_validation_throttling();
    let detector = conflict_detector();
    with_context(|ctx| {
        if !ctx.is_closed() {
            return false;
        }
        ctx.closed = false;
        let mut scope = OpenScope::new(level);
        if level != MemoryValidationLevel::Disabled && ctx.monitor.admit(throttling) {
            let ranges = ctx.tracked_ranges();
            let started = Instant::now();
            // SAFETY: tracked ranges stay valid until the nest finishes
            let bytes = unsafe { scope.take_baseline(&ranges, detector.as_ref()) };
            ctx.monitor.charge(started.elapsed(), bytes);
        }
        ctx.open_scopes.push(scope);
        true
    })
}

fn exit_open() {
    let detector = conflict_detector();
    let outcome = with_context(|ctx| {
        let scope = ctx.open_scopes.pop()?;
        ctx.closed = true;
        if !scope.has_baseline() {
            return None;
        }
        let started = Instant::now();
        // SAFETY: tracked ranges stay valid until the nest finishes
        let (conflicts, bytes) = unsafe { scope.find_conflicts(detector.as_ref()) };
        ctx.monitor.charge(started.elapsed(), bytes);
        ctx.monitor.record_check(conflicts.len());
        Some((scope.level, conflicts, ctx.monitor.due_report()))
    });
    if let Some((level, conflicts, report)) = outcome {
        if let Some(stats) = report {
            log_stats(&stats);
        }
        report_conflicts(level, &conflicts);
    }
}

/// Check the innermost open scope so far, before closed code runs inside it
fn suspend_open_scope() {
    let detector = conflict_detector();
    let outcome = with_context(|ctx| {
        let scope = ctx.open_scopes.last()?;
        if !scope.has_baseline() {
            return None;
        }
        // SAFETY: tracked ranges stay valid until the nest finishes
        let (conflicts, bytes) = unsafe { scope.find_conflicts(detector.as_ref()) };
        ctx.monitor.record_check(conflicts.len());
        ctx.monitor.charge(std::time::Duration::ZERO, bytes);
        Some((scope.level, conflicts))
    });
    if let Some((level, conflicts)) = outcome {
        report_conflicts(level, &conflicts);
    }
}

/// Re-fingerprint the innermost open scope after closed code ran inside it
fn resume_open_scope() {
    let detector = conflict_detector();
    try_with_context(|ctx| {
        let ranges = ctx.tracked_ranges();
        if let Some(scope) = ctx.open_scopes.last_mut() {
            if scope.has_baseline() {
                // SAFETY: tracked ranges stay valid until the nest finishes
                let bytes = unsafe { scope.take_baseline(&ranges, detector.as_ref()) };
                ctx.monitor.charge(std::time::Duration::ZERO, bytes);
            }
        }
    });
}

/// Excuse a range from the innermost open scope's validation
pub(crate) fn excuse_range(range: WriteRange) {
    try_with_context(|ctx| {
        if let Some(scope) = ctx.open_scopes.last_mut() {
            scope.excuse(range);
        }
    });
}

// ============================================================================
// Closing
// ============================================================================

/// Run `body` as closed code from inside a transaction
///
/// Returns the context status once `body` finishes. Calling this outside
/// any transaction is fatal.
pub fn close<F>(body: F) -> ContextStatus
where
    F: FnOnce(),
{
    let state = with_context(|ctx| (ctx.in_transaction(), ctx.closed));
    let was_closed = match state {
        (false, _) => fatal!("close called outside a transaction"),
        (true, closed) => closed,
    };
    let in_open_scope = !was_closed && with_context(|ctx| !ctx.open_scopes.is_empty());
    if in_open_scope {
        suspend_open_scope();
    }
    let guard = CloseGuard {
        was_closed,
        in_open_scope,
    };
    with_context(|ctx| ctx.closed = true);
    body();
    drop(guard);
    with_context(|ctx| ctx.status)
}

struct CloseGuard {
    was_closed: bool,
    in_open_scope: bool,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let was_closed = self.was_closed;
        try_with_context(|ctx| ctx.closed = was_closed);
        if self.in_open_scope && !std::thread::panicking() {
            resume_open_scope();
        }
    }
}

// ============================================================================
// Static local initialization
// ============================================================================

/// Run a lazy static's initializer so that it survives an abort
///
/// Inside a transaction, `f` runs as open code with status
/// `InStaticLocalInitializer`.
pub fn in_static_local_initializer<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let saved = with_context(|ctx| {
        if !ctx.in_transaction() || ctx.status != ContextStatus::OnTrack {
            return None;
        }
        let saved = (ctx.status, ctx.closed);
        ctx.status = ContextStatus::InStaticLocalInitializer;
        ctx.closed = false;
        Some(saved)
    });
    let Some(saved) = saved else {
        return f();
    };
    let _restore = StaticInitGuard { saved };
    f()
}

struct StaticInitGuard {
    saved: (ContextStatus, bool),
}

impl Drop for StaticInitGuard {
    fn drop(&mut self) {
        let (status, closed) = self.saved;
        try_with_context(|ctx| {
            ctx.status = status;
            ctx.closed = closed;
        });
    }
}
