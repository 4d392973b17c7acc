//! Guarantees that hold for every transaction
//!
//! - tracked writes followed by an abort leave memory bit-identical
//! - commit handlers of a committed child die with an aborting ancestor
//! - commit handlers run FIFO, abort handlers LIFO
//! - deferred releases become visible only after commit
//! - one real lock/unlock pair per nest, however often it relocks
//! - a cascading abort from the innermost frame undoes every level

use crate::*;
use proptest::prelude::*;
use std::rc::Rc;
use std::sync::Arc;
use txmem::prelude::*;
use txmem::txmem_engine::cascading_abort_transaction;

// =============================================================================
// MEMORY RESTORATION
// =============================================================================

fn scribble(buffer: *mut u8, len: usize, writes: &[(usize, u8)]) {
    for &(offset, value) in writes {
        let offset = offset % len;
        unsafe {
            record_write(buffer.add(offset), 1);
            *buffer.add(offset) = value;
        }
    }
}

proptest! {
    #[test]
    fn prop_abort_leaves_memory_bit_identical(
        initial in prop::collection::vec(any::<u8>(), 1..128),
        outer in prop::collection::vec((any::<usize>(), any::<u8>()), 0..32),
        inner in prop::collection::vec((any::<usize>(), any::<u8>()), 0..32),
    ) {
        let _env = TestEnv::new();
        let mut buffer = initial.clone();
        let len = buffer.len();
        let ptr = buffer.as_mut_ptr();
        let result = transact(|| {
            scribble(ptr, len, &outer);
            transact(|| scribble(ptr, len, &inner));
            abort_transaction();
        });
        prop_assert_eq!(result, TransactionResult::AbortedByRequest);
        prop_assert_eq!(buffer, initial);
    }
}

#[test]
fn test_wide_and_overlapping_writes_restore() {
    let _env = TestEnv::new();
    let mut words = [0x1111_1111u32; 8];
    let base = words.as_mut_ptr() as *mut u8;
    let result = transact(|| unsafe {
        record_write(base, 32);
        base.write_bytes(0xff, 32);
        record_write(base.add(4), 8);
        base.add(4).write_bytes(0x00, 8);
        transact(|| {
            record_write(base.add(2), 4);
            base.add(2).write_bytes(0x55, 4);
        });
        abort_transaction();
    });
    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(words, [0x1111_1111u32; 8]);
}

// =============================================================================
// HANDLER VISIBILITY AND ORDER
// =============================================================================

#[test]
fn test_committed_child_handlers_dropped_by_aborting_ancestor() {
    let _env = TestEnv::new();
    let events = Events::new();
    let result = transact(|| {
        transact(|| {
            let inner = transact(|| on_commit(events.note("grandchild")));
            assert_eq!(inner, TransactionResult::Committed);
            on_commit(events.note("child"));
        });
        abort_transaction();
    });
    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert!(events.snapshot().is_empty());
}

#[test]
fn test_handler_order_with_interleaved_registration() {
    let _env = TestEnv::new();
    let committed = Events::new();
    transact(|| {
        on_commit(committed.note("c1"));
        on_abort(committed.note("never"));
        transact(|| {
            on_commit(committed.note("c2"));
            on_abort(committed.note("never"));
        });
        on_commit(committed.note("c3"));
        transact(|| on_commit(committed.note("c4")));
    });
    assert_eq!(committed.snapshot(), vec!["c1", "c2", "c3", "c4"]);

    let aborted = Events::new();
    transact(|| {
        on_abort(aborted.note("a1"));
        on_commit(aborted.note("never"));
        transact(|| on_abort(aborted.note("a2")));
        on_abort(aborted.note("a3"));
        transact(|| {
            on_abort(aborted.note("a4"));
            on_commit(aborted.note("never"));
        });
        abort_transaction();
    });
    assert_eq!(aborted.snapshot(), vec!["a4", "a3", "a2", "a1"]);
}

// =============================================================================
// DEFERRED RELEASE
// =============================================================================

#[test]
fn test_pool_release_visible_only_after_commit() {
    let _env = TestEnv::new();
    let pool = TxPool::new(64, 16);
    let blocks: Vec<_> = (0..3).map(|_| pool.allocate()).collect();

    let p = Rc::clone(&pool);
    let b = blocks.clone();
    transact(move || {
        for block in &b {
            unsafe { p.free(*block) };
            assert_eq!(p.free_count(), 0);
        }
        transact(|| assert_eq!(p.free_count(), 0));
    });
    assert_eq!(pool.free_count(), 3);

    let reused: Vec<_> = (0..3).map(|_| pool.allocate()).collect();
    let p = Rc::clone(&pool);
    let r = reused.clone();
    let result = transact(move || {
        for block in &r {
            unsafe { p.free(*block) };
        }
        abort_transaction();
    });
    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(pool.free_count(), 0);
    for block in reused {
        unsafe { pool.free(block) };
    }
}

// =============================================================================
// LOCKING
// =============================================================================

#[test]
fn test_nested_acquisitions_take_one_real_lock() {
    let _env = TestEnv::new();
    let mutex = Arc::new(TxMutex::new(0u32));
    let m = Arc::clone(&mutex);
    transact(move || {
        for _ in 0..4 {
            let inner = Arc::clone(&m);
            transact(move || {
                let mut guard = inner.lock();
                let next = *guard + 1;
                guard.set(next);
            });
            assert!(m.is_locked(), "lock must outlive the nested frame");
        }
        assert_eq!(m.lock_count(), 1);
        assert_eq!(m.unlock_count(), 0);
    });
    assert_eq!(mutex.lock_count(), 1);
    assert_eq!(mutex.unlock_count(), 1);
    assert!(!mutex.is_locked());
    assert_eq!(*mutex.lock(), 4);
}

// =============================================================================
// CASCADING ABORT
// =============================================================================

#[test]
fn test_cascade_from_innermost_undoes_three_levels() {
    let _env = TestEnv::new();
    let mut values = [10u32, 20, 30];
    let ptr = values.as_mut_ptr();
    let events = Events::new();

    let result = transact(|| unsafe {
        write(&mut *ptr, 11);
        on_abort(events.note("outer"));
        transact(|| {
            write(&mut *ptr.add(1), 21);
            on_abort(events.note("middle"));
            transact(|| {
                write(&mut *ptr.add(2), 31);
                on_abort(events.note("inner"));
                cascading_abort_transaction();
            });
            events.push("unreachable");
        });
        events.push("unreachable");
    });

    assert_eq!(result, TransactionResult::AbortedByCascade);
    assert_eq!(values, [10, 20, 30]);
    assert_eq!(events.snapshot(), vec!["inner", "middle", "outer"]);
}
