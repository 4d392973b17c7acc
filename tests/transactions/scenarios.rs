//! Worked scenarios
//!
//! Small end-to-end programs whose observable outcome is fixed: what the
//! caller sees after an aborted allocation, a committed write to a sink,
//! an aborted arithmetic update and nested reference counting.

use crate::*;
use std::io::{self, Write};
use std::rc::Rc;
use txmem::prelude::*;

/// Sink that records bytes and flush calls
#[derive(Default)]
struct Sink {
    bytes: Vec<u8>,
    flushes: usize,
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

// =============================================================================
// ALLOCATION
// =============================================================================

#[test]
fn test_aborted_allocation_is_returned_to_pool() {
    let _env = TestEnv::new();
    let pool = TxPool::new(42, 8);
    let mut block: *mut u8 = std::ptr::null_mut();
    let slot: *mut *mut u8 = &mut block;

    let p = Rc::clone(&pool);
    let result = transact(move || unsafe {
        let fresh = p.allocate().as_ptr();
        write(&mut *slot, fresh);
        record_write(fresh.add(2), 1);
        *fresh.add(2) = 42;
        abort_transaction();
    });

    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert!(block.is_null(), "caller must not see the aborted allocation");
    assert_eq!(pool.free_count(), 1);
}

// =============================================================================
// DEFERRED OUTPUT
// =============================================================================

#[test]
fn test_committed_output_matches_unwrapped_sink() {
    let _env = TestEnv::new();

    let mut plain = Sink::default();
    plain.write_all(b"Hello").unwrap();
    plain.flush().unwrap();

    let writer = TxWriter::new(Sink::default());
    let mut w = writer.clone();
    commit(move || {
        w.write_all(b"Hello").unwrap();
        w.flush().unwrap();
        w.with_sink(|sink| {
            assert!(sink.bytes.is_empty(), "output must wait for commit");
            assert_eq!(sink.flushes, 0);
        });
    });

    writer.with_sink(|sink| {
        assert_eq!(sink.bytes, plain.bytes);
        assert_eq!(sink.flushes, 1);
    });
}

// =============================================================================
// ARITHMETIC UPDATE
// =============================================================================

#[test]
fn test_aborted_add_restores_exact_value() {
    let _env = TestEnv::new();
    let mut x: u64 = 0x1234_5678_9abc_def0;
    let ptr: *mut u64 = &mut x;

    let result = transact(|| unsafe {
        let sum = (*ptr).wrapping_add(0xa1b2_c3d4_e5f6_0789);
        write(&mut *ptr, sum);
        assert_eq!(*ptr, 0xb3e7_1a4d_80b2_e679);
        abort_transaction();
    });

    assert_eq!(result, TransactionResult::AbortedByRequest);
    assert_eq!(x, 0x1234_5678_9abc_def0);
}

// =============================================================================
// REFERENCE COUNTING
// =============================================================================

fn build_shared(out: &mut Option<TxRc<String>>) {
    let original = TxRc::new(String::from("shared"));
    let copy = original.clone();
    *out = Some(copy);
}

#[test]
fn test_nested_commits_leave_plain_reference_counts() {
    let _env = TestEnv::new();

    let mut plain = None;
    build_shared(&mut plain);
    let plain = plain.unwrap();
    assert_eq!(TxRc::strong_count(&plain), 1);

    let mut outer = None;
    let mut inner = None;
    commit(|| {
        build_shared(&mut outer);
        commit(|| build_shared(&mut inner));
    });

    let outer = outer.unwrap();
    let inner = inner.unwrap();
    assert_eq!(TxRc::strong_count(&outer), TxRc::strong_count(&plain));
    assert_eq!(TxRc::strong_count(&inner), 1);
    assert_eq!(outer.as_str(), "shared");
}
