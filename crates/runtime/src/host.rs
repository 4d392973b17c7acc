//! Host callback table
//!
//! The host supplies allocation, logging and failure callbacks, plus
//! optional notifications that fire after a configuration setter runs.
//! [`HostCallbacks`] is the raw table as the host fills it in;
//! [`HostCallbacks::validate`] turns it into a [`Host`] whose required
//! entries are guaranteed present.
//!
//! | Callback | Required |
//! |----------|----------|
//! | allocate / reallocate / allocate_zeroed / free | yes |
//! | log / log_with_callstack / ensure_failure / is_log_active | yes |
//! | on_*_changed | no |

use std::alloc::Layout;
use std::fmt;
use txmem_core::{Error, Result};

/// Severity of a host log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// High-volume internals
    Verbose,
    /// Routine information
    Info,
    /// Something suspicious that does not stop execution
    Warning,
    /// A failure that the engine reports and survives
    Error,
    /// A failure the engine does not survive
    Fatal,
}

/// One log line handed to the host
#[derive(Debug)]
pub struct LogRecord<'a> {
    /// Source file of the call site
    pub file: &'static str,
    /// Source line of the call site
    pub line: u32,
    /// Severity
    pub severity: Severity,
    /// Formatted message
    pub message: fmt::Arguments<'a>,
}

/// A failed engine assertion handed to the host
#[derive(Debug)]
pub struct FailureRecord<'a> {
    /// Source file of the failed check
    pub file: &'static str,
    /// Source line of the failed check
    pub line: u32,
    /// Text of the condition that failed
    pub condition: &'a str,
    /// Formatted message
    pub message: fmt::Arguments<'a>,
}

/// `allocate(size, align)`
pub type AllocateFn = fn(usize, usize) -> *mut u8;
/// `reallocate(ptr, old_size, new_size, align)`
pub type ReallocateFn = fn(*mut u8, usize, usize, usize) -> *mut u8;
/// `allocate_zeroed(size, align)`
pub type AllocateZeroedFn = fn(usize, usize) -> *mut u8;
/// `free(ptr, size, align)`
pub type FreeFn = fn(*mut u8, usize, usize);
/// Log sink
pub type LogFn = fn(&LogRecord<'_>);
/// Failed-assertion sink
pub type EnsureFailureFn = fn(&FailureRecord<'_>);
/// Severity filter
pub type IsLogActiveFn = fn(Severity) -> bool;
/// Change notification
pub type NotifyFn = fn();

/// Host callback table as supplied by the host
#[derive(Clone, Copy, Default)]
pub struct HostCallbacks {
    /// Raw allocation
    pub allocate: Option<AllocateFn>,
    /// Resize an allocation
    pub reallocate: Option<ReallocateFn>,
    /// Zero-filled allocation
    pub allocate_zeroed: Option<AllocateZeroedFn>,
    /// Release an allocation
    pub free: Option<FreeFn>,
    /// Plain log
    pub log: Option<LogFn>,
    /// Log including the current call stack
    pub log_with_callstack: Option<LogFn>,
    /// Failed engine assertion
    pub ensure_failure: Option<EnsureFailureFn>,
    /// Whether a severity is being recorded at all
    pub is_log_active: Option<IsLogActiveFn>,
    /// Fired after the enablement state changes
    pub on_enabled_changed: Option<NotifyFn>,
    /// Fired after the retry policy changes
    pub on_retry_changed: Option<NotifyFn>,
    /// Fired after the memory validation level changes
    pub on_memory_validation_level_changed: Option<NotifyFn>,
    /// Fired after memory validation throttling is toggled
    pub on_memory_validation_throttling_changed: Option<NotifyFn>,
    /// Fired after memory validation statistics are toggled
    pub on_memory_validation_statistics_changed: Option<NotifyFn>,
}

impl HostCallbacks {
    /// Table backed by the global allocator and `tracing`
    pub fn with_defaults() -> Self {
        HostCallbacks {
            allocate: Some(default_allocate),
            reallocate: Some(default_reallocate),
            allocate_zeroed: Some(default_allocate_zeroed),
            free: Some(default_free),
            log: Some(default_log),
            log_with_callstack: Some(default_log_with_callstack),
            ensure_failure: Some(default_ensure_failure),
            is_log_active: Some(default_is_log_active),
            ..Default::default()
        }
    }

    /// Check that every required entry is present
    pub fn validate(&self) -> Result<Host> {
        Ok(Host {
            allocate: self.allocate.ok_or(Error::MissingCallback("allocate"))?,
            reallocate: self.reallocate.ok_or(Error::MissingCallback("reallocate"))?,
            allocate_zeroed: self
                .allocate_zeroed
                .ok_or(Error::MissingCallback("allocate_zeroed"))?,
            free: self.free.ok_or(Error::MissingCallback("free"))?,
            log: self.log.ok_or(Error::MissingCallback("log"))?,
            log_with_callstack: self
                .log_with_callstack
                .ok_or(Error::MissingCallback("log_with_callstack"))?,
            ensure_failure: self
                .ensure_failure
                .ok_or(Error::MissingCallback("ensure_failure"))?,
            is_log_active: self
                .is_log_active
                .ok_or(Error::MissingCallback("is_log_active"))?,
            notifications: Notifications {
                enabled: self.on_enabled_changed,
                retry: self.on_retry_changed,
                validation_level: self.on_memory_validation_level_changed,
                validation_throttling: self.on_memory_validation_throttling_changed,
                validation_statistics: self.on_memory_validation_statistics_changed,
            },
        })
    }
}

impl fmt::Debug for HostCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCallbacks")
            .field("allocate", &self.allocate.is_some())
            .field("reallocate", &self.reallocate.is_some())
            .field("allocate_zeroed", &self.allocate_zeroed.is_some())
            .field("free", &self.free.is_some())
            .field("log", &self.log.is_some())
            .field("log_with_callstack", &self.log_with_callstack.is_some())
            .field("ensure_failure", &self.ensure_failure.is_some())
            .field("is_log_active", &self.is_log_active.is_some())
            .finish_non_exhaustive()
    }
}

/// Optional change notifications of a validated table
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Notifications {
    pub(crate) enabled: Option<NotifyFn>,
    pub(crate) retry: Option<NotifyFn>,
    pub(crate) validation_level: Option<NotifyFn>,
    pub(crate) validation_throttling: Option<NotifyFn>,
    pub(crate) validation_statistics: Option<NotifyFn>,
}

/// Validated host table
#[derive(Clone, Copy)]
pub struct Host {
    allocate: AllocateFn,
    reallocate: ReallocateFn,
    allocate_zeroed: AllocateZeroedFn,
    free: FreeFn,
    log: LogFn,
    log_with_callstack: LogFn,
    ensure_failure: EnsureFailureFn,
    is_log_active: IsLogActiveFn,
    pub(crate) notifications: Notifications,
}

impl Host {
    /// Allocate `size` bytes aligned to `align`; null on failure
    #[inline]
    pub fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        (self.allocate)(size, align)
    }

    /// Resize an allocation made by this host
    #[inline]
    pub fn reallocate(&self, ptr: *mut u8, old_size: usize, new_size: usize, align: usize) -> *mut u8 {
        (self.reallocate)(ptr, old_size, new_size, align)
    }

    /// Allocate zero-filled memory
    #[inline]
    pub fn allocate_zeroed(&self, size: usize, align: usize) -> *mut u8 {
        (self.allocate_zeroed)(size, align)
    }

    /// Release an allocation made by this host
    #[inline]
    pub fn free(&self, ptr: *mut u8, size: usize, align: usize) {
        (self.free)(ptr, size, align)
    }

    /// Whether records of `severity` are kept
    #[inline]
    pub fn is_log_active(&self, severity: Severity) -> bool {
        (self.is_log_active)(severity)
    }

    /// Emit a log record
    pub fn log(&self, record: &LogRecord<'_>) {
        (self.log)(record)
    }

    /// Emit a log record with the current call stack
    pub fn log_with_callstack(&self, record: &LogRecord<'_>) {
        (self.log_with_callstack)(record)
    }

    /// Report a failed engine assertion
    pub fn ensure_failure(&self, record: &FailureRecord<'_>) {
        (self.ensure_failure)(record)
    }
}

impl Default for Host {
    fn default() -> Self {
        match HostCallbacks::with_defaults().validate() {
            Ok(host) => host,
            Err(_) => unreachable!("default host table is complete"),
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

// ============================================================================
// Default callbacks
// ============================================================================

fn layout(size: usize, align: usize) -> Option<Layout> {
    Layout::from_size_align(size, align).ok()
}

// Zero-sized requests get a dangling, well-aligned pointer and are never
// passed to the global allocator.
fn dangling(align: usize) -> *mut u8 {
    align.max(1) as *mut u8
}

fn default_allocate(size: usize, align: usize) -> *mut u8 {
    if size == 0 {
        return dangling(align);
    }
    match layout(size, align) {
        // SAFETY: layout has non-zero size
        Some(layout) => unsafe { std::alloc::alloc(layout) },
        None => std::ptr::null_mut(),
    }
}

fn default_allocate_zeroed(size: usize, align: usize) -> *mut u8 {
    if size == 0 {
        return dangling(align);
    }
    match layout(size, align) {
        // SAFETY: layout has non-zero size
        Some(layout) => unsafe { std::alloc::alloc_zeroed(layout) },
        None => std::ptr::null_mut(),
    }
}

fn default_reallocate(ptr: *mut u8, old_size: usize, new_size: usize, align: usize) -> *mut u8 {
    if old_size == 0 {
        return default_allocate(new_size, align);
    }
    if new_size == 0 {
        default_free(ptr, old_size, align);
        return dangling(align);
    }
    match layout(old_size, align) {
        // SAFETY: ptr was returned by default_allocate with this layout
        Some(old) => unsafe { std::alloc::realloc(ptr, old, new_size) },
        None => std::ptr::null_mut(),
    }
}

fn default_free(ptr: *mut u8, size: usize, align: usize) {
    if size == 0 || ptr.is_null() {
        return;
    }
    if let Some(layout) = layout(size, align) {
        // SAFETY: ptr was returned by default_allocate with this layout
        unsafe { std::alloc::dealloc(ptr, layout) }
    }
}

fn default_log(record: &LogRecord<'_>) {
    let (file, line, message) = (record.file, record.line, record.message);
    match record.severity {
        Severity::Verbose => tracing::trace!(file, line, "{}", message),
        Severity::Info => tracing::info!(file, line, "{}", message),
        Severity::Warning => tracing::warn!(file, line, "{}", message),
        Severity::Error | Severity::Fatal => tracing::error!(file, line, "{}", message),
    }
}

fn default_log_with_callstack(record: &LogRecord<'_>) {
    default_log(record);
    let backtrace = std::backtrace::Backtrace::force_capture();
    tracing::debug!(file = record.file, line = record.line, "call stack:\n{}", backtrace);
}

fn default_ensure_failure(record: &FailureRecord<'_>) {
    tracing::error!(
        file = record.file,
        line = record.line,
        condition = record.condition,
        "{}",
        record.message
    );
}

fn default_is_log_active(severity: Severity) -> bool {
    match severity {
        Severity::Verbose => tracing::enabled!(tracing::Level::TRACE),
        Severity::Info => tracing::enabled!(tracing::Level::INFO),
        Severity::Warning => tracing::enabled!(tracing::Level::WARN),
        Severity::Error | Severity::Fatal => true,
    }
}
