//! Open-code memory validation
//!
//! Open code that changes memory closed code already wrote would make a
//! later rollback restore stale bytes. These tests pin down when that is
//! detected, how each level reacts and which writes are excused.

use crate::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use txmem::prelude::*;
use txmem::txmem_engine::{
    record_open_write_no_memory_validation, reset_validation_stats, set_conflict_detector,
    validation_stats, ConflictDetector, HashDetector, WriteRange,
};

#[test]
#[should_panic(expected = "memory validation conflict")]
fn test_conflict_is_fatal_by_default() {
    let _env = TestEnv::new();
    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    transact(|| unsafe {
        write(&mut *ptr, 1);
        open(|| *ptr = 2);
    });
}

#[test]
fn test_warn_level_counts_conflicts() {
    let _env = TestEnv::new();
    config().set_memory_validation_level(MemoryValidationLevel::Warn);
    reset_validation_stats();

    let mut values = [0u32; 4];
    let ptr = values.as_mut_ptr();
    let result = transact(|| unsafe {
        write(&mut *ptr, 1);
        write(&mut *ptr.add(2), 1);
        open(|| {
            *ptr = 5;
            *ptr.add(1) = 5;
            *ptr.add(2) = 5;
        });
    });

    assert_eq!(result, TransactionResult::Committed);
    let stats = validation_stats();
    assert_eq!(stats.checks, 1);
    assert_eq!(stats.conflicts, 2, "the untracked slot is not a conflict");
    assert!(stats.bytes >= 8);
}

#[test]
fn test_unchanged_memory_passes() {
    let _env = TestEnv::new();
    reset_validation_stats();
    let mut value = 0u64;
    let ptr: *mut u64 = &mut value;
    transact(|| unsafe {
        write(&mut *ptr, 7);
        let seen: u64 = open(|| *ptr);
        assert_eq!(seen, 7);
    });
    assert_eq!(validation_stats().conflicts, 0);
    assert_eq!(validation_stats().checks, 1);
}

#[test]
fn test_disabled_scopes_are_not_checked() {
    let _env = TestEnv::new();
    reset_validation_stats();
    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    transact(|| unsafe {
        write(&mut *ptr, 1);
        open_no_validation(|| *ptr = 2);
        open_with_validation(MemoryValidationLevel::Disabled, || *ptr = 3);
    });
    assert_eq!(value, 3);
    assert_eq!(validation_stats().checks, 0);
}

#[test]
fn test_excused_open_write_is_undone_without_conflict() {
    let _env = TestEnv::new();
    let mut value = 10u32;
    let ptr: *mut u32 = &mut value;
    let result = transact(|| unsafe {
        write(&mut *ptr, 11);
        open(|| {
            record_open_write_no_memory_validation(ptr as *const u8, 4);
            *ptr = 12;
        });
        assert_eq!(*ptr, 12);
        abort_transaction();
    });
    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(value, 10);
}

#[test]
fn test_ancestor_ranges_are_validated() {
    let _env = TestEnv::new();
    config().set_memory_validation_level(MemoryValidationLevel::Warn);
    reset_validation_stats();
    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    transact(|| unsafe {
        write(&mut *ptr, 1);
        transact(|| {
            open(|| *ptr = 2);
        });
    });
    assert_eq!(validation_stats().conflicts, 1);
}

#[inline(never)]
fn scribble_stack() {
    let mut scratch = [0x5au8; 8192];
    std::hint::black_box(&mut scratch);
}

#[test]
fn test_dead_nested_locals_survive_later_open_scope() {
    let _env = TestEnv::new();
    config().set_memory_validation_level(MemoryValidationLevel::Error);
    let result = transact(|| {
        transact(|| {
            let mut local = 0u64;
            let ptr: *mut u64 = &mut local;
            transact(|| unsafe { write(&mut *ptr, 7) });
            assert_eq!(std::hint::black_box(local), 7);
        });
        open(scribble_stack);
    });
    assert_eq!(result, TransactionResult::Committed);
}

// =============================================================================
// PLUGGABLE DETECTOR
// =============================================================================

/// Hash detector that also counts comparisons
struct CountingDetector {
    inner: HashDetector,
    comparisons: Arc<AtomicUsize>,
}

impl ConflictDetector for CountingDetector {
    fn fingerprint(&self, bytes: &[u8]) -> u64 {
        self.inner.fingerprint(bytes)
    }

    fn is_conflict(&self, range: WriteRange, current: &[u8], baseline: u64) -> bool {
        self.comparisons.fetch_add(1, Ordering::Relaxed);
        self.inner.is_conflict(range, current, baseline)
    }
}

#[test]
fn test_custom_detector_is_consulted() {
    let _env = TestEnv::new();
    let comparisons = Arc::new(AtomicUsize::new(0));
    set_conflict_detector(Arc::new(CountingDetector {
        inner: HashDetector,
        comparisons: Arc::clone(&comparisons),
    }));

    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    transact(|| unsafe {
        write(&mut *ptr, 1);
        open(|| {});
    });
    set_conflict_detector(Arc::new(HashDetector));

    assert_eq!(comparisons.load(Ordering::Relaxed), 1);
}
