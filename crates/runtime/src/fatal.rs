//! The single fatal-fault path
//!
//! A fatal fault is reported to the host's `ensure_failure` callback and
//! then raised as a Rust panic. A transaction the panic escapes from is
//! rolled back by the engine before the panic continues outward.

use crate::config::config;
use crate::host::FailureRecord;
use std::fmt;

/// Report and panic
#[cold]
#[inline(never)]
pub fn fatal_error(
    file: &'static str,
    line: u32,
    condition: &str,
    message: fmt::Arguments<'_>,
) -> ! {
    config().host().ensure_failure(&FailureRecord {
        file,
        line,
        condition,
        message,
    });
    if condition.is_empty() {
        panic!("txmem fatal: {}", message)
    } else {
        panic!("txmem fatal: {} ({})", message, condition)
    }
}
