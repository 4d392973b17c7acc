//! Nesting, open/closed transitions and misuse
//!
//! Covers how frames interact: transactions started from handlers, open
//! code inside closed code and back, manual frames, in-place rollback,
//! cascading retry, and panics escaping a body.

use crate::*;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use txmem::prelude::*;
use txmem::txmem_engine::{
    cascading_abort_transaction_with, clear_transaction_status, commit_transaction,
    in_static_local_initializer, is_committing_or_aborting, start_transaction, transaction_depth,
};

// =============================================================================
// TRANSACT FROM HANDLERS
// =============================================================================

#[test]
fn test_transact_in_commit_handler_is_refused() {
    let _env = TestEnv::new();
    let seen = Rc::new(Cell::new(None));
    let ran = Rc::new(Cell::new(false));
    let (s, r) = (Rc::clone(&seen), Rc::clone(&ran));
    transact(move || {
        let (s, r) = (Rc::clone(&s), Rc::clone(&r));
        on_commit(move || {
            assert!(is_committing_or_aborting());
            s.set(Some(transact(|| r.set(true))));
        });
    });
    assert_eq!(seen.get(), Some(TransactionResult::AbortedByTransactInOnCommit));
    assert!(!ran.get(), "refused body must not run");
}

#[test]
fn test_transact_in_abort_handler_is_refused() {
    let _env = TestEnv::new();
    let seen = Rc::new(Cell::new(None));
    let s = Rc::clone(&seen);
    transact(move || {
        let s = Rc::clone(&s);
        on_abort(move || s.set(Some(transact(|| {}))));
        abort_transaction();
    });
    assert_eq!(seen.get(), Some(TransactionResult::AbortedByTransactInOnAbort));
    assert!(!is_transactional());
    assert_eq!(get_context_status(), ContextStatus::Idle);
}

// =============================================================================
// OPEN AND CLOSED CODE
// =============================================================================

#[test]
fn test_open_effects_survive_abort() {
    let _env = TestEnv::new();
    let mut counter = 0u32;
    let ptr: *mut u32 = &mut counter;
    let result = transact(|| {
        assert!(is_closed());
        let observed: u32 = open(|| unsafe {
            assert!(!is_closed());
            assert!(is_transactional());
            *ptr += 1;
            *ptr
        });
        assert_eq!(observed, 1);
        assert!(is_closed());
        abort_transaction();
    });
    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(counter, 1);
}

#[test]
fn test_close_inside_open_is_undone() {
    let _env = TestEnv::new();
    let mut value = 3u64;
    let ptr: *mut u64 = &mut value;
    let result = transact(|| {
        open(|| {
            let status = close(|| unsafe { write(&mut *ptr, 4) });
            assert_eq!(status, ContextStatus::OnTrack);
            assert!(!is_closed());
        });
        abort_transaction();
    });
    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(value, 3);
}

#[test]
fn test_transact_from_open_code_nests_closed() {
    let _env = TestEnv::new();
    let mut value = 1u32;
    let ptr: *mut u32 = &mut value;
    let nested = Cell::new(None);
    let result = transact(|| {
        open(|| {
            let r = transact(|| unsafe {
                assert!(is_closed());
                assert_eq!(transaction_depth(), 2);
                write(&mut *ptr, 2);
            });
            nested.set(Some(r));
        });
        abort_transaction();
    });
    assert_eq!(nested.get(), Some(TransactionResult::Committed));
    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(value, 1, "committed child merges into the aborting parent");
}

#[test]
#[should_panic(expected = "close called outside a transaction")]
fn test_close_outside_transaction_is_fatal() {
    let _env = TestEnv::new();
    close(|| {});
}

#[test]
fn test_static_initializer_survives_abort() {
    let _env = TestEnv::new();
    let mut cache = 0u32;
    let ptr: *mut u32 = &mut cache;
    transact(|| {
        in_static_local_initializer(|| {
            assert_eq!(get_context_status(), ContextStatus::InStaticLocalInitializer);
            assert!(!is_closed());
            unsafe { write(&mut *ptr, 99) };
        });
        assert_eq!(get_context_status(), ContextStatus::OnTrack);
        abort_transaction();
    });
    assert_eq!(cache, 99);
}

// =============================================================================
// MANUAL FRAMES AND ROLLBACK
// =============================================================================

#[test]
fn test_manual_frames_inside_scoped_transaction() {
    let _env = TestEnv::new();
    let mut value = 1u32;
    let ptr: *mut u32 = &mut value;
    let events = Events::new();
    let result = transact(|| unsafe {
        write(&mut *ptr, 2);

        start_transaction();
        write(&mut *ptr, 3);
        on_abort(events.note("manual abort"));
        assert_eq!(abort_transaction(), ContextStatus::AbortedByRequest);
        assert_eq!(*ptr, 2);

        start_transaction();
        write(&mut *ptr, 4);
        on_commit(events.note("manual commit"));
        assert_eq!(commit_transaction(), TransactionResult::Committed);
        assert_eq!(transaction_depth(), 1);
    });
    assert_eq!(result, TransactionResult::Committed);
    assert_eq!(value, 4);
    assert_eq!(events.snapshot(), vec!["manual abort", "manual commit"]);
}

#[test]
fn test_rollback_then_continue_as_fresh_frame() {
    let _env = TestEnv::new();
    let mut value = 10u32;
    let ptr: *mut u32 = &mut value;
    let result = transact(|| unsafe {
        write(&mut *ptr, 11);
        assert_eq!(rollback_transaction(), TransactionResult::AbortedByRequest);
        assert_eq!(*ptr, 10);
        clear_transaction_status();
        write(&mut *ptr, 12);
    });
    assert_eq!(result, TransactionResult::Committed);
    assert_eq!(value, 12);
}

// =============================================================================
// CASCADES
// =============================================================================

#[test]
fn test_cascading_retry_reruns_outermost_body() {
    let _env = TestEnv::new();
    let mut value = 0u32;
    let ptr: *mut u32 = &mut value;
    let attempts = Cell::new(0);
    let before_retry_status = Rc::new(Cell::new(None));
    let result = transact(|| unsafe {
        attempts.set(attempts.get() + 1);
        let next = *ptr + 1;
        write(&mut *ptr, next);
        if attempts.get() == 1 {
            let status = Rc::clone(&before_retry_status);
            transact(move || {
                let status = Rc::clone(&status);
                cascading_retry_transaction(move || status.set(Some(get_context_status())));
            });
        }
    });
    assert_eq!(result, TransactionResult::Committed);
    assert_eq!(attempts.get(), 2);
    assert_eq!(value, 1, "first attempt's write was undone");
    assert_eq!(before_retry_status.get(), Some(ContextStatus::InPostAbort));
}

#[test]
fn test_cascading_abort_runs_work_after_rollback() {
    let _env = TestEnv::new();
    let mut value = 5u32;
    let ptr = &mut value as *mut u32 as usize;
    let observed = Rc::new(Cell::new(0));
    let o = Rc::clone(&observed);
    let result = transact(move || {
        unsafe { write(&mut *(ptr as *mut u32), 6) };
        let o = Rc::clone(&o);
        transact(move || {
            let o = Rc::clone(&o);
            cascading_abort_transaction_with(move || o.set(unsafe { *(ptr as *const u32) }));
        });
    });
    assert_eq!(result, TransactionResult::AbortedByCascade);
    assert_eq!(observed.get(), 5, "after-abort work sees restored memory");
    assert_eq!(value, 5);
}

// =============================================================================
// PANICS
// =============================================================================

#[test]
fn test_panic_in_body_rolls_back_and_propagates() {
    let _env = TestEnv::new();
    let mut value = 7u32;
    let ptr: *mut u32 = &mut value;
    let events = Events::new();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        transact(|| unsafe {
            write(&mut *ptr, 8);
            on_abort(events.note("outer abort"));
            transact(|| {
                write(&mut *ptr, 9);
                on_abort(events.note("inner abort"));
                panic!("body failed");
            });
        })
    }));
    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"body failed"));
    assert_eq!(value, 7);
    assert_eq!(events.snapshot(), vec!["inner abort", "outer abort"]);
    assert!(!is_transactional());
    assert_eq!(transaction_depth(), 0);
}
