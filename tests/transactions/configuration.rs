//! Process-wide configuration as seen by transactions
//!
//! Enablement tiers, probability, forced retries, the internal-abort
//! action, change notifications and a custom host table.

use crate::*;
use std::alloc::Layout;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use txmem::prelude::*;
use txmem::txmem_core::{AbiLayout, EnablementState, Error, InternalAbortAction, RetryPolicy};
use txmem::txmem_engine::language_abort;
use txmem::txmem_runtime::{
    try_initialize, HostCallbacks, LogRecord, RuntimeSettings, SettingChange, Severity,
};

// =============================================================================
// ENABLEMENT
// =============================================================================

#[test]
fn test_disabled_engine_runs_body_directly() {
    let _env = TestEnv::new();
    config()
        .set_enablement_state(EnablementState::Disabled)
        .unwrap();

    let events = Events::new();
    let mut value = 1u32;
    let ptr: *mut u32 = &mut value;
    let result = transact(|| unsafe {
        assert!(!is_transactional());
        write(&mut *ptr, 2);
        on_commit(events.note("ran immediately"));
        assert_eq!(events.count("ran immediately"), 1);
    });
    assert_eq!(result, TransactionResult::Committed);
    assert_eq!(value, 2);
}

#[test]
fn test_forced_state_wins_over_configuration() {
    let _env = TestEnv::new();
    config()
        .set_enablement_state(EnablementState::ForcedEnabled)
        .unwrap();

    let err = config()
        .set_enablement_state(EnablementState::Disabled)
        .unwrap_err();
    assert!(matches!(err, Error::EnablementLocked { .. }));
    assert!(config().is_enabled());

    let result = transact(|| assert!(is_transactional()));
    assert_eq!(result, TransactionResult::Committed);
}

#[test]
fn test_zero_probability_skips_instrumentation() {
    let _env = TestEnv::new();
    config().set_enabled_probability(0.0).unwrap();
    let mut inside = true;
    transact(|| inside = is_transactional());
    assert!(!inside);

    assert!(config().set_enabled_probability(100.5).is_err());
}

// =============================================================================
// FORCED RETRIES
// =============================================================================

#[test]
fn test_retry_non_nested_reruns_outermost_once() {
    let _env = TestEnv::new();
    config().set_retry_policy(RetryPolicy::RetryNonNested);

    let outer_runs = Cell::new(0);
    let inner_runs = Cell::new(0);
    let events = Events::new();
    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    let result = transact(|| unsafe {
        outer_runs.set(outer_runs.get() + 1);
        let next = *ptr + 1;
        write(&mut *ptr, next);
        on_commit(events.note("commit"));
        on_abort(events.note("abort"));
        transact(|| inner_runs.set(inner_runs.get() + 1));
    });

    assert_eq!(result, TransactionResult::Committed);
    assert_eq!(outer_runs.get(), 2);
    assert_eq!(inner_runs.get(), 2);
    assert_eq!(value, 1, "the forced abort undid the first pass");
    assert_eq!(events.snapshot(), vec!["abort", "commit"]);
}

#[test]
fn test_retry_nested_too_reruns_nested_bodies() {
    let _env = TestEnv::new();
    config().set_retry_policy(RetryPolicy::RetryNestedToo);

    let inner_runs = Cell::new(0);
    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    let result = transact(|| {
        transact(|| unsafe {
            inner_runs.set(inner_runs.get() + 1);
            let next = *ptr + 1;
            write(&mut *ptr, next);
        });
    });

    assert_eq!(result, TransactionResult::Committed);
    assert!(inner_runs.get() >= 2, "nested body ran {} time(s)", inner_runs.get());
    assert_eq!(value, 1);
}

// =============================================================================
// INTERNAL ABORTS
// =============================================================================

#[test]
fn test_language_abort_downgraded_to_abort() {
    let _env = TestEnv::new();
    config().set_internal_abort_action(InternalAbortAction::Abort);

    let mut value = 1u32;
    let ptr: *mut u32 = &mut value;
    let result = transact(|| unsafe {
        write(&mut *ptr, 2);
        language_abort("unsupported construct");
    });
    assert_eq!(result, TransactionResult::AbortedByLanguage);
    assert_eq!(value, 1);
}

#[test]
#[should_panic(expected = "unsupported construct")]
fn test_language_abort_crashes_by_default() {
    let _env = TestEnv::new();
    transact(|| language_abort("unsupported construct"));
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

#[test]
fn test_listeners_see_every_setter() {
    let _env = TestEnv::new();
    let changes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    let id = config().subscribe(move |change| sink.lock().push(change));

    config().set_retry_policy(RetryPolicy::RetryNonNested);
    config().set_memory_validation_level(MemoryValidationLevel::Warn);
    config().set_memory_validation_statistics(true);
    assert!(config().unsubscribe(id));
    config().set_retry_policy(RetryPolicy::NoRetry);

    assert_eq!(
        *changes.lock(),
        vec![
            SettingChange::Retry(RetryPolicy::RetryNonNested),
            SettingChange::MemoryValidationLevel(MemoryValidationLevel::Warn),
            SettingChange::MemoryValidationStatistics(true),
        ]
    );
}

// =============================================================================
// HOST TABLE
// =============================================================================

static HOST_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static HOST_WARNINGS: AtomicUsize = AtomicUsize::new(0);

fn counting_allocate(size: usize, align: usize) -> *mut u8 {
    HOST_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    match Layout::from_size_align(size.max(1), align) {
        Ok(layout) => unsafe { std::alloc::alloc(layout) },
        Err(_) => std::ptr::null_mut(),
    }
}

fn counting_allocate_zeroed(size: usize, align: usize) -> *mut u8 {
    HOST_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    match Layout::from_size_align(size.max(1), align) {
        Ok(layout) => unsafe { std::alloc::alloc_zeroed(layout) },
        Err(_) => std::ptr::null_mut(),
    }
}

fn counting_reallocate(ptr: *mut u8, old_size: usize, new_size: usize, align: usize) -> *mut u8 {
    match Layout::from_size_align(old_size.max(1), align) {
        Ok(layout) => unsafe { std::alloc::realloc(ptr, layout, new_size.max(1)) },
        Err(_) => std::ptr::null_mut(),
    }
}

fn counting_free(ptr: *mut u8, size: usize, align: usize) {
    if let Ok(layout) = Layout::from_size_align(size.max(1), align) {
        unsafe { std::alloc::dealloc(ptr, layout) }
    }
}

fn counting_log(record: &LogRecord<'_>) {
    if record.severity >= Severity::Warning {
        HOST_WARNINGS.fetch_add(1, Ordering::Relaxed);
    }
}

fn always_active(_: Severity) -> bool {
    true
}

fn counting_table() -> HostCallbacks {
    HostCallbacks {
        allocate: Some(counting_allocate),
        allocate_zeroed: Some(counting_allocate_zeroed),
        reallocate: Some(counting_reallocate),
        free: Some(counting_free),
        log: Some(counting_log),
        log_with_callstack: Some(counting_log),
        is_log_active: Some(always_active),
        ..HostCallbacks::with_defaults()
    }
}

#[test]
fn test_engine_storage_comes_from_host() {
    let _env = TestEnv::new();
    try_initialize(counting_table(), &AbiLayout::current(), &RuntimeSettings::new()).unwrap();
    let before = HOST_ALLOCATIONS.load(Ordering::Relaxed);

    let mut value = 0u64;
    let ptr: *mut u64 = &mut value;
    let result = transact(|| unsafe {
        write(&mut *ptr, 1);
        abort_transaction();
    });

    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(value, 0);
    assert!(HOST_ALLOCATIONS.load(Ordering::Relaxed) > before);
}

#[test]
fn test_settings_applied_at_initialization() {
    let _env = TestEnv::new();
    let settings = RuntimeSettings::new()
        .retry(RetryPolicy::RetryNestedToo)
        .memory_validation_level(MemoryValidationLevel::Warn);
    try_initialize(counting_table(), &AbiLayout::current(), &settings).unwrap();

    assert_eq!(config().retry_policy(), RetryPolicy::RetryNestedToo);
    assert_eq!(config().memory_validation_level(), MemoryValidationLevel::Warn);

    // conflicts are reported through the host log at Warn
    let before = HOST_WARNINGS.load(Ordering::Relaxed);
    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    config().set_retry_policy(RetryPolicy::NoRetry);
    transact(|| unsafe {
        write(&mut *ptr, 1);
        open(|| *ptr = 2);
    });
    assert!(HOST_WARNINGS.load(Ordering::Relaxed) > before);
    assert_eq!(value, 2);
}

#[test]
fn test_incomplete_host_table_is_rejected() {
    let _env = TestEnv::new();
    let table = HostCallbacks {
        free: None,
        ..HostCallbacks::with_defaults()
    };
    let err = try_initialize(table, &AbiLayout::current(), &RuntimeSettings::new()).unwrap_err();
    assert!(matches!(err, Error::MissingCallback("free")));
}
