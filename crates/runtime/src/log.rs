//! Logging through the host table
//!
//! Every diagnostic the engine emits goes through these macros so that a
//! host can capture it. The severity filter is consulted before the
//! message is formatted.

use crate::config::config;
use crate::host::{LogRecord, Severity};
use std::fmt;

#[doc(hidden)]
pub fn emit(severity: Severity, file: &'static str, line: u32, message: fmt::Arguments<'_>) {
    let host = config().host();
    if host.is_log_active(severity) {
        host.log(&LogRecord {
            file,
            line,
            severity,
            message,
        });
    }
}

#[doc(hidden)]
pub fn emit_with_callstack(
    severity: Severity,
    file: &'static str,
    line: u32,
    message: fmt::Arguments<'_>,
) {
    let host = config().host();
    if host.is_log_active(severity) {
        host.log_with_callstack(&LogRecord {
            file,
            line,
            severity,
            message,
        });
    }
}

/// Log through the host table
///
/// ```ignore
/// host_log!(Severity::Warning, "frame {} leaked {} bytes", depth, bytes);
/// ```
#[macro_export]
macro_rules! host_log {
    ($severity:expr, $($arg:tt)+) => {
        $crate::log::emit($severity, file!(), line!(), format_args!($($arg)+))
    };
}

/// Log through the host table, including the call stack
#[macro_export]
macro_rules! host_log_with_callstack {
    ($severity:expr, $($arg:tt)+) => {
        $crate::log::emit_with_callstack($severity, file!(), line!(), format_args!($($arg)+))
    };
}

/// Report a fatal fault and panic
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {
        $crate::fatal::fatal_error(file!(), line!(), "", format_args!($($arg)+))
    };
}

/// Check an engine invariant; a failure is fatal
#[macro_export]
macro_rules! host_ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal::fatal_error(
                file!(),
                line!(),
                stringify!($cond),
                format_args!($($arg)+),
            )
        }
    };
}
