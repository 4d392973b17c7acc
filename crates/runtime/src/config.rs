//! Process-wide runtime configuration
//!
//! [`RuntimeConfig`] is the only cross-thread mutable state of the
//! engine. Hot-path reads are plain atomic loads. Setters are serialized
//! by one lock that is also held while the matching host notification and
//! every subscribed listener run, so listeners observe changes in order.
//! The lock is reentrant: a listener may call setters itself.
//!
//! # Example
//!
//! ```ignore
//! use txmem_runtime::{config, RetryPolicy};
//!
//! config().set_retry_policy(RetryPolicy::RetryNestedToo);
//! assert_eq!(config().retry_policy(), RetryPolicy::RetryNestedToo);
//! ```

use crate::host::{Host, NotifyFn};
use crate::settings::RuntimeSettings;
use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, RwLock};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use txmem_core::{
    check_abi, AbiLayout, EnablementState, Error, InternalAbortAction, MemoryValidationLevel,
    Result, RetryPolicy,
};

/// A configuration change, as delivered to listeners
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingChange {
    /// New enablement state
    Enablement(EnablementState),
    /// New retry policy
    Retry(RetryPolicy),
    /// New internal-abort action
    InternalAbortAction(InternalAbortAction),
    /// New memory validation level
    MemoryValidationLevel(MemoryValidationLevel),
    /// Throttling toggled
    MemoryValidationThrottling(bool),
    /// Statistics toggled
    MemoryValidationStatistics(bool),
    /// New enabled probability
    EnabledProbability(f32),
}

/// Handle returned by [`RuntimeConfig::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(SettingChange) + Send + Sync>;

/// Process-wide configuration
pub struct RuntimeConfig {
    enablement: AtomicU8,
    retry: AtomicU8,
    internal_abort: AtomicU8,
    validation_level: AtomicU8,
    validation_throttling: AtomicBool,
    validation_statistics: AtomicBool,
    /// `f32` bits
    probability: AtomicU32,
    host: RwLock<Host>,
    setter_lock: ReentrantMutex<()>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

static RUNTIME: Lazy<RuntimeConfig> = Lazy::new(|| {
    if let Err(e) = check_abi(&AbiLayout::current()) {
        panic!("txmem runtime failed its own ABI self-check: {}", e);
    }
    RuntimeConfig::new()
});

/// The process-wide configuration
///
/// The first call runs the ABI self-check and installs the default host
/// table if the host has not initialized the runtime yet.
#[inline]
pub fn config() -> &'static RuntimeConfig {
    &RUNTIME
}

impl RuntimeConfig {
    fn new() -> Self {
        let defaults = RuntimeSettings::default();
        RuntimeConfig {
            enablement: AtomicU8::new(defaults.enablement.as_raw()),
            retry: AtomicU8::new(defaults.retry.as_raw()),
            internal_abort: AtomicU8::new(defaults.internal_abort_action.as_raw()),
            validation_level: AtomicU8::new(defaults.memory_validation_level.as_raw()),
            validation_throttling: AtomicBool::new(defaults.memory_validation_throttling),
            validation_statistics: AtomicBool::new(defaults.memory_validation_statistics),
            probability: AtomicU32::new(defaults.enabled_probability.to_bits()),
            host: RwLock::new(Host::default()),
            setter_lock: ReentrantMutex::new(()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    // ========================================================================
    // Host table
    // ========================================================================

    /// Current host table
    #[inline]
    pub fn host(&self) -> Host {
        *self.host.read()
    }

    /// Replace the host table
    pub fn install_host(&self, host: Host) {
        let _guard = self.setter_lock.lock();
        *self.host.write() = host;
    }

    // ========================================================================
    // Enablement
    // ========================================================================

    /// Current enablement state
    pub fn enablement_state(&self) -> EnablementState {
        EnablementState::from_raw(self.enablement.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Whether transactions run transactionally
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enablement_state().is_enabled()
    }

    /// Change the enablement state, honoring tiers
    pub fn set_enablement_state(&self, state: EnablementState) -> Result<()> {
        let _guard = self.setter_lock.lock();
        let current = self.enablement_state();
        if !current.can_transition_to(state) {
            tracing::warn!(?current, requested = ?state, "enablement change rejected");
            return Err(Error::EnablementLocked {
                current,
                requested: state,
            });
        }
        self.enablement.store(state.as_raw(), Ordering::Release);
        tracing::debug!(?state, "enablement changed");
        self.notify(self.host().notifications.enabled, SettingChange::Enablement(state));
        Ok(())
    }

    /// Probability (0..=100) that an enabled outermost transaction actually
    /// runs transactionally
    pub fn enabled_probability(&self) -> f32 {
        f32::from_bits(self.probability.load(Ordering::Acquire))
    }

    /// Set the enabled probability
    pub fn set_enabled_probability(&self, probability: f32) -> Result<()> {
        if !(0.0..=100.0).contains(&probability) {
            return Err(Error::InvalidProbability(probability));
        }
        let _guard = self.setter_lock.lock();
        self.probability
            .store(probability.to_bits(), Ordering::Release);
        self.notify(None, SettingChange::EnabledProbability(probability));
        Ok(())
    }

    /// Decide whether the next outermost transaction runs transactionally
    pub fn should_run_transactionally(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let probability = self.enabled_probability();
        if probability >= 100.0 {
            return true;
        }
        if probability <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_range(0.0f32..100.0) < probability
    }

    // ========================================================================
    // Retry and internal aborts
    // ========================================================================

    /// Current retry policy
    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_raw(self.retry.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Set the retry policy
    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        let _guard = self.setter_lock.lock();
        self.retry.store(policy.as_raw(), Ordering::Release);
        tracing::debug!(?policy, "retry policy changed");
        self.notify(self.host().notifications.retry, SettingChange::Retry(policy));
    }

    /// What engine-detected faults do
    #[inline]
    pub fn internal_abort_action(&self) -> InternalAbortAction {
        InternalAbortAction::from_raw(self.internal_abort.load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Set the internal-abort action
    pub fn set_internal_abort_action(&self, action: InternalAbortAction) {
        let _guard = self.setter_lock.lock();
        self.internal_abort.store(action.as_raw(), Ordering::Release);
        self.notify(None, SettingChange::InternalAbortAction(action));
    }

    // ========================================================================
    // Memory validation
    // ========================================================================

    /// Configured memory validation level (may be `Default`)
    #[inline]
    pub fn memory_validation_level(&self) -> MemoryValidationLevel {
        MemoryValidationLevel::from_raw(self.validation_level.load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Level with `Default` resolved
    #[inline]
    pub fn effective_memory_validation_level(&self) -> MemoryValidationLevel {
        self.memory_validation_level()
            .resolve(MemoryValidationLevel::Default)
    }

    /// Set the memory validation level
    pub fn set_memory_validation_level(&self, level: MemoryValidationLevel) {
        let _guard = self.setter_lock.lock();
        self.validation_level.store(level.as_raw(), Ordering::Release);
        self.notify(
            self.host().notifications.validation_level,
            SettingChange::MemoryValidationLevel(level),
        );
    }

    /// Whether validation may be skipped once it exceeds its time budget
    #[inline]
    pub fn memory_validation_throttling(&self) -> bool {
        self.validation_throttling.load(Ordering::Acquire)
    }

    /// Toggle validation throttling
    pub fn set_memory_validation_throttling(&self, enabled: bool) {
        let _guard = self.setter_lock.lock();
        self.validation_throttling.store(enabled, Ordering::Release);
        self.notify(
            self.host().notifications.validation_throttling,
            SettingChange::MemoryValidationThrottling(enabled),
        );
    }

    /// Whether validation statistics are collected and reported
    #[inline]
    pub fn memory_validation_statistics(&self) -> bool {
        self.validation_statistics.load(Ordering::Acquire)
    }

    /// Toggle validation statistics
    pub fn set_memory_validation_statistics(&self, enabled: bool) {
        let _guard = self.setter_lock.lock();
        self.validation_statistics.store(enabled, Ordering::Release);
        self.notify(
            self.host().notifications.validation_statistics,
            SettingChange::MemoryValidationStatistics(enabled),
        );
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Every knob as a serializable value
    pub fn snapshot(&self) -> RuntimeSettings {
        RuntimeSettings {
            enablement: self.enablement_state(),
            retry: self.retry_policy(),
            internal_abort_action: self.internal_abort_action(),
            memory_validation_level: self.memory_validation_level(),
            memory_validation_throttling: self.memory_validation_throttling(),
            memory_validation_statistics: self.memory_validation_statistics(),
            enabled_probability: self.enabled_probability(),
        }
    }

    /// Apply every knob of `settings` through the regular setters
    ///
    /// Stops at the first rejected value; earlier values stay applied.
    pub fn apply(&self, settings: &RuntimeSettings) -> Result<()> {
        let _guard = self.setter_lock.lock();
        if settings.enablement != self.enablement_state() {
            self.set_enablement_state(settings.enablement)?;
        }
        self.set_enabled_probability(settings.enabled_probability)?;
        self.set_retry_policy(settings.retry);
        self.set_internal_abort_action(settings.internal_abort_action);
        self.set_memory_validation_level(settings.memory_validation_level);
        self.set_memory_validation_throttling(settings.memory_validation_throttling);
        self.set_memory_validation_statistics(settings.memory_validation_statistics);
        Ok(())
    }

    /// Restore built-in defaults, ignoring enablement tiers
    ///
    /// Intended for test harnesses; listeners are not notified.
    pub fn reset(&self) {
        let _guard = self.setter_lock.lock();
        let defaults = RuntimeSettings::default();
        self.enablement
            .store(defaults.enablement.as_raw(), Ordering::Release);
        self.retry.store(defaults.retry.as_raw(), Ordering::Release);
        self.internal_abort
            .store(defaults.internal_abort_action.as_raw(), Ordering::Release);
        self.validation_level
            .store(defaults.memory_validation_level.as_raw(), Ordering::Release);
        self.validation_throttling
            .store(defaults.memory_validation_throttling, Ordering::Release);
        self.validation_statistics
            .store(defaults.memory_validation_statistics, Ordering::Release);
        self.probability
            .store(defaults.enabled_probability.to_bits(), Ordering::Release);
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a listener called after every successful setter
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(SettingChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; false if it was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify(&self, host_callback: Option<NotifyFn>, change: SettingChange) {
        if let Some(callback) = host_callback {
            callback();
        }
        // Clone out so a listener may subscribe or unsubscribe
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("settings", &self.snapshot())
            .finish_non_exhaustive()
    }
}
