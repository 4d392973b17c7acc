//! Process-wide configuration knobs
//!
//! The enablement state is tiered. A setter may only replace the current
//! state with one of the same or a higher tier, and a forced state is
//! final:
//!
//! ```text
//! Default < Explicit (Enabled/Disabled) < Overridden < Forced
//! ```

use serde::{Deserialize, Serialize};

/// Tier of an [`EnablementState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EnablementTier {
    /// Built-in default
    Default,
    /// Ordinary configuration
    Explicit,
    /// Overrides ordinary configuration
    Overridden,
    /// Final; nothing replaces it
    Forced,
}

/// Whether transactions run transactionally at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnablementState {
    /// Built-in default, disabled
    DefaultDisabled,
    /// Built-in default, enabled
    DefaultEnabled,
    /// Disabled by configuration
    Disabled,
    /// Enabled by configuration
    Enabled,
    /// Disabled, overriding configuration
    OverriddenDisabled,
    /// Enabled, overriding configuration
    OverriddenEnabled,
    /// Disabled for the life of the process
    ForcedDisabled,
    /// Enabled for the life of the process
    ForcedEnabled,
}

impl EnablementState {
    /// Tier this state belongs to
    pub const fn tier(self) -> EnablementTier {
        match self {
            EnablementState::DefaultDisabled | EnablementState::DefaultEnabled => {
                EnablementTier::Default
            }
            EnablementState::Disabled | EnablementState::Enabled => EnablementTier::Explicit,
            EnablementState::OverriddenDisabled | EnablementState::OverriddenEnabled => {
                EnablementTier::Overridden
            }
            EnablementState::ForcedDisabled | EnablementState::ForcedEnabled => {
                EnablementTier::Forced
            }
        }
    }

    /// Whether the engine runs transactions in this state
    pub const fn is_enabled(self) -> bool {
        matches!(
            self,
            EnablementState::DefaultEnabled
                | EnablementState::Enabled
                | EnablementState::OverriddenEnabled
                | EnablementState::ForcedEnabled
        )
    }

    /// Whether `self` may be replaced by `next`
    pub fn can_transition_to(self, next: EnablementState) -> bool {
        if self.tier() == EnablementTier::Forced {
            return false;
        }
        next.tier() >= self.tier()
    }

    /// Compact encoding for atomic storage
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    /// Inverse of [`EnablementState::as_raw`]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(EnablementState::DefaultDisabled),
            1 => Some(EnablementState::DefaultEnabled),
            2 => Some(EnablementState::Disabled),
            3 => Some(EnablementState::Enabled),
            4 => Some(EnablementState::OverriddenDisabled),
            5 => Some(EnablementState::OverriddenEnabled),
            6 => Some(EnablementState::ForcedDisabled),
            7 => Some(EnablementState::ForcedEnabled),
            _ => None,
        }
    }
}

impl Default for EnablementState {
    fn default() -> Self {
        EnablementState::DefaultEnabled
    }
}

/// Artificial abort injection used to exercise abort paths in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Never inject aborts
    #[default]
    NoRetry,
    /// Abort and rerun every outermost transaction once
    RetryNonNested,
    /// Additionally abort and rerun every nested transaction once
    RetryNestedToo,
}

impl RetryPolicy {
    /// Whether a transaction at `depth` (0 = outermost) gets a forced retry
    pub const fn retries_at_depth(self, depth: usize) -> bool {
        match self {
            RetryPolicy::NoRetry => false,
            RetryPolicy::RetryNonNested => depth == 0,
            RetryPolicy::RetryNestedToo => true,
        }
    }

    /// Compact encoding for atomic storage
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    /// Inverse of [`RetryPolicy::as_raw`]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(RetryPolicy::NoRetry),
            1 => Some(RetryPolicy::RetryNonNested),
            2 => Some(RetryPolicy::RetryNestedToo),
            _ => None,
        }
    }
}

/// What an engine-detected fault does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InternalAbortAction {
    /// Fail fast
    #[default]
    Crash,
    /// Degrade to an abort reported as `AbortedByLanguage`
    Abort,
}

impl InternalAbortAction {
    /// Compact encoding for atomic storage
    pub const fn as_raw(self) -> u8 {
        self as u8
    }

    /// Inverse of [`InternalAbortAction::as_raw`]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(InternalAbortAction::Crash),
            1 => Some(InternalAbortAction::Abort),
            _ => None,
        }
    }
}
