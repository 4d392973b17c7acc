//! Serializable snapshot of every runtime knob
//!
//! Use the builder methods to describe a configuration and hand it to
//! [`crate::initialize`] or [`crate::RuntimeConfig::apply`]:
//!
//! ```ignore
//! use txmem_runtime::{RuntimeSettings, RetryPolicy};
//!
//! let settings = RuntimeSettings::new()
//!     .retry(RetryPolicy::RetryNonNested)
//!     .memory_validation_statistics(true);
//! ```

use serde::{Deserialize, Serialize};
use txmem_core::{EnablementState, InternalAbortAction, MemoryValidationLevel, RetryPolicy};

/// Every runtime knob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Tiered enablement state
    pub enablement: EnablementState,
    /// Artificial abort injection
    pub retry: RetryPolicy,
    /// What engine-detected faults do
    pub internal_abort_action: InternalAbortAction,
    /// Conflict severity
    pub memory_validation_level: MemoryValidationLevel,
    /// Skip validation once it exceeds its time budget
    pub memory_validation_throttling: bool,
    /// Collect and periodically log validation statistics
    pub memory_validation_statistics: bool,
    /// 0..=100
    pub enabled_probability: f32,
}

impl RuntimeSettings {
    /// Built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the enablement state
    pub fn enablement(mut self, state: EnablementState) -> Self {
        self.enablement = state;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Set the internal-abort action
    pub fn internal_abort_action(mut self, action: InternalAbortAction) -> Self {
        self.internal_abort_action = action;
        self
    }

    /// Set the memory validation level
    pub fn memory_validation_level(mut self, level: MemoryValidationLevel) -> Self {
        self.memory_validation_level = level;
        self
    }

    /// Toggle validation throttling
    pub fn memory_validation_throttling(mut self, enabled: bool) -> Self {
        self.memory_validation_throttling = enabled;
        self
    }

    /// Toggle validation statistics
    pub fn memory_validation_statistics(mut self, enabled: bool) -> Self {
        self.memory_validation_statistics = enabled;
        self
    }

    /// Set the enabled probability
    pub fn enabled_probability(mut self, probability: f32) -> Self {
        self.enabled_probability = probability;
        self
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSettings {
            enablement: EnablementState::DefaultEnabled,
            retry: RetryPolicy::NoRetry,
            internal_abort_action: InternalAbortAction::Crash,
            memory_validation_level: MemoryValidationLevel::Default,
            memory_validation_throttling: true,
            memory_validation_statistics: false,
            enabled_probability: 100.0,
        }
    }
}
