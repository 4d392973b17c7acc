//! Memory validation
//!
//! Every tracked write registers its range in the innermost frame's
//! [`ValidationRecord`]. When closed code enters an open scope, the engine
//! fingerprints every range registered by any active frame; when the scope
//! exits, it fingerprints them again. A range whose fingerprint changed was
//! written by open code behind the transaction's back, which means a later
//! rollback would restore stale bytes over it. That is a conflict.
//!
//! Ranges passed to `record_open_write_no_memory_validation` inside the
//! scope are excused.
//!
//! The fingerprint scheme is pluggable through [`ConflictDetector`]; the
//! default [`HashDetector`] hashes the bytes with `FxHasher`.
//!
//! Validation time is budgeted per thread: with throttling enabled, a
//! thread that spent [`VALIDATION_BUDGET`] validating within the current
//! [`VALIDATION_WINDOW`] skips further checks until the window rolls over.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::{FxHashSet, FxHasher};
use std::collections::BTreeSet;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use txmem_core::MemoryValidationLevel;
use txmem_runtime::{config, fatal, host_log, host_log_with_callstack, Severity};

/// Length of a throttling window
pub const VALIDATION_WINDOW: Duration = Duration::from_secs(1);

/// Validation time allowed per window when throttling is on
pub const VALIDATION_BUDGET: Duration = Duration::from_millis(100);

/// Minimum spacing between statistics reports
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Ranges
// ============================================================================

/// A contiguous byte range written by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteRange {
    /// First byte
    pub address: usize,
    /// Length in bytes
    pub len: usize,
}

impl WriteRange {
    /// Range of `len` bytes starting at `address`
    pub const fn new(address: usize, len: usize) -> Self {
        WriteRange { address, len }
    }

    /// One past the last byte
    pub const fn end(&self) -> usize {
        self.address.saturating_add(self.len)
    }

    /// Whether the two ranges share at least one byte
    pub const fn overlaps(&self, other: &WriteRange) -> bool {
        self.address < other.end() && other.address < self.end()
    }

    /// Whether the range begins inside `[base, base + len)`
    pub const fn starts_within(&self, base: usize, len: usize) -> bool {
        self.address >= base && self.address < base.saturating_add(len)
    }

    /// # Safety
    ///
    /// The range must be readable.
    unsafe fn bytes<'a>(&self) -> &'a [u8] {
        std::slice::from_raw_parts(self.address as *const u8, self.len)
    }
}

/// Ranges written transactionally by one frame
#[derive(Debug, Default)]
pub(crate) struct ValidationRecord {
    ranges: FxHashSet<WriteRange>,
}

impl ValidationRecord {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, range: WriteRange) {
        if range.len > 0 {
            self.ranges.insert(range);
        }
    }

    /// Forget ranges that start inside `[base, base + len)`
    pub(crate) fn remove_within(&mut self, base: usize, len: usize) {
        self.ranges.retain(|r| !r.starts_within(base, len.max(1)));
    }

    pub(crate) fn append(&mut self, child: ValidationRecord) {
        self.ranges.extend(child.ranges);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &WriteRange> {
        self.ranges.iter()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, range: &WriteRange) -> bool {
        self.ranges.contains(range)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ranges.len()
    }

    pub(crate) fn clear(&mut self) {
        self.ranges.clear();
    }
}

// ============================================================================
// Conflict detection strategy
// ============================================================================

/// Strategy deciding whether tracked bytes changed during an open scope
pub trait ConflictDetector: Send + Sync {
    /// Summarize the bytes of a range
    fn fingerprint(&self, bytes: &[u8]) -> u64;

    /// Whether `current` differs from the state summarized by `baseline`
    fn is_conflict(&self, range: WriteRange, current: &[u8], baseline: u64) -> bool {
        let _ = range;
        self.fingerprint(current) != baseline
    }
}

/// Default detector: `FxHasher` over the raw bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct HashDetector;

impl ConflictDetector for HashDetector {
    fn fingerprint(&self, bytes: &[u8]) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_usize(bytes.len());
        hasher.write(bytes);
        hasher.finish()
    }
}

static DETECTOR: Lazy<RwLock<Arc<dyn ConflictDetector>>> =
    Lazy::new(|| RwLock::new(Arc::new(HashDetector)));

/// Install a conflict detector, returning the previous one
pub fn set_conflict_detector(detector: Arc<dyn ConflictDetector>) -> Arc<dyn ConflictDetector> {
    std::mem::replace(&mut *DETECTOR.write(), detector)
}

/// Detector currently in use
pub fn conflict_detector() -> Arc<dyn ConflictDetector> {
    Arc::clone(&DETECTOR.read())
}

// ============================================================================
// Open scopes
// ============================================================================

/// Validation state of one open scope entered from closed code
#[derive(Debug)]
pub(crate) struct OpenScope {
    pub(crate) level: MemoryValidationLevel,
    baseline: Option<Vec<(WriteRange, u64)>>,
    excused: Vec<WriteRange>,
}

impl OpenScope {
    pub(crate) fn new(level: MemoryValidationLevel) -> Self {
        OpenScope {
            level,
            baseline: None,
            excused: Vec::new(),
        }
    }

    pub(crate) fn excuse(&mut self, range: WriteRange) {
        self.excused.push(range);
    }

    fn is_excused(&self, range: &WriteRange) -> bool {
        self.excused.iter().any(|e| e.overlaps(range))
    }

    /// Fingerprint every tracked range
    ///
    /// # Safety
    ///
    /// Every range must be readable.
    pub(crate) unsafe fn take_baseline(
        &mut self,
        ranges: &BTreeSet<WriteRange>,
        detector: &dyn ConflictDetector,
    ) -> usize {
        let mut bytes = 0;
        let baseline = ranges
            .iter()
            .map(|range| {
                bytes += range.len;
                (*range, detector.fingerprint(range.bytes()))
            })
            .collect();
        self.baseline = Some(baseline);
        self.excused.clear();
        bytes
    }

    /// Compare against the baseline, returning conflicting ranges
    ///
    /// # Safety
    ///
    /// Every baseline range must still be readable.
    pub(crate) unsafe fn find_conflicts(
        &self,
        detector: &dyn ConflictDetector,
    ) -> (Vec<WriteRange>, usize) {
        let mut conflicts = Vec::new();
        let mut bytes = 0;
        if let Some(baseline) = &self.baseline {
            for (range, fingerprint) in baseline {
                if self.is_excused(range) {
                    continue;
                }
                bytes += range.len;
                if detector.is_conflict(*range, range.bytes(), *fingerprint) {
                    conflicts.push(*range);
                }
            }
        }
        (conflicts, bytes)
    }

    pub(crate) fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Drop baseline entries for a released block
    pub(crate) fn forget_within(&mut self, base: usize, len: usize) {
        if let Some(baseline) = &mut self.baseline {
            baseline.retain(|(r, _)| !r.starts_within(base, len.max(1)));
        }
    }
}

/// Apply the configured severity to a set of conflicts
pub(crate) fn report_conflicts(level: MemoryValidationLevel, conflicts: &[WriteRange]) {
    let Some(first) = conflicts.first() else {
        return;
    };
    match level {
        MemoryValidationLevel::Disabled | MemoryValidationLevel::Default => {}
        MemoryValidationLevel::Warn => {
            host_log_with_callstack!(
                Severity::Warning,
                "open code modified {} transactionally written range(s), first at {:#x} ({} bytes)",
                conflicts.len(),
                first.address,
                first.len
            );
        }
        MemoryValidationLevel::Error => {
            fatal!(
                "memory validation conflict: open code modified {} transactionally written range(s), first at {:#x} ({} bytes)",
                conflicts.len(),
                first.address,
                first.len
            );
        }
    }
}

// ============================================================================
// Throttling and statistics
// ============================================================================

/// Per-thread validation counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidationStats {
    /// Open scopes validated
    pub checks: u64,
    /// Bytes fingerprinted, baselines included
    pub bytes: u64,
    /// Conflicting ranges found
    pub conflicts: u64,
    /// Scopes skipped by throttling
    pub skipped: u64,
    /// Time spent validating
    pub time: Duration,
}

/// Per-thread throttle and statistics
#[derive(Debug, Default)]
pub(crate) struct ValidationMonitor {
    window_start: Option<Instant>,
    spent: Duration,
    stats: ValidationStats,
    last_report: Option<Instant>,
}

impl ValidationMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether another validation fits in the current window
    pub(crate) fn admit(&mut self, throttling: bool) -> bool {
        let now = Instant::now();
        match self.window_start {
            Some(start) if now.duration_since(start) < VALIDATION_WINDOW => {}
            _ => {
                self.window_start = Some(now);
                self.spent = Duration::ZERO;
            }
        }
        if throttling && self.spent >= VALIDATION_BUDGET {
            self.stats.skipped += 1;
            return false;
        }
        true
    }

    pub(crate) fn charge(&mut self, elapsed: Duration, bytes: usize) {
        self.spent += elapsed;
        self.stats.time += elapsed;
        self.stats.bytes += bytes as u64;
    }

    pub(crate) fn record_check(&mut self, conflicts: usize) {
        self.stats.checks += 1;
        self.stats.conflicts += conflicts as u64;
    }

    pub(crate) fn stats(&self) -> ValidationStats {
        self.stats
    }

    pub(crate) fn reset(&mut self) {
        *self = ValidationMonitor::new();
    }

    /// Stats to log now, at most once per interval
    pub(crate) fn due_report(&mut self) -> Option<ValidationStats> {
        if !config().memory_validation_statistics() {
            return None;
        }
        let now = Instant::now();
        match self.last_report {
            Some(last) if now.duration_since(last) < REPORT_INTERVAL => None,
            _ => {
                self.last_report = Some(now);
                Some(self.stats)
            }
        }
    }
}

pub(crate) fn log_stats(stats: &ValidationStats) {
    host_log!(
        Severity::Info,
        "memory validation: {} checks, {} bytes, {} conflicts, {} skipped, {:?} spent",
        stats.checks,
        stats.bytes,
        stats.conflicts,
        stats.skipped,
        stats.time
    );
}

/// Validation counters of the calling thread
pub fn validation_stats() -> ValidationStats {
    crate::context::try_with_context(|ctx| ctx.monitor.stats()).unwrap_or_default()
}

/// Zero the calling thread's validation counters and throttle window
pub fn reset_validation_stats() {
    crate::context::try_with_context(|ctx| ctx.monitor.reset());
}
