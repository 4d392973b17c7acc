//! Runtime configuration and host integration for txmem
//!
//! This crate provides:
//! - [`HostCallbacks`] / [`Host`]: the host callback table (allocation,
//!   logging, failure reporting, change notifications)
//! - [`RuntimeConfig`]: the process-wide configuration singleton
//! - [`RuntimeSettings`]: a serializable snapshot of every knob
//! - `host_log!`, `host_log_with_callstack!`, `fatal!`, `host_ensure!`:
//!   diagnostics routed through the host table
//!
//! # Initialization
//!
//! ```ignore
//! use txmem_runtime::{initialize, HostCallbacks, RuntimeSettings};
//! use txmem_core::AbiLayout;
//!
//! initialize(HostCallbacks::with_defaults(), &AbiLayout::current(), &RuntimeSettings::new());
//! ```
//!
//! A process that never calls [`initialize`] runs with the default host
//! table and default settings.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod fatal;
pub mod host;
#[macro_use]
pub mod log;
pub mod settings;

pub use config::{config, ListenerId, RuntimeConfig, SettingChange};
pub use host::{FailureRecord, Host, HostCallbacks, LogRecord, Severity};
pub use settings::RuntimeSettings;
pub use txmem_core::{
    AbiLayout, EnablementState, Error, InternalAbortAction, MemoryValidationLevel, Result,
    RetryPolicy,
};

/// Validate and install a host table and settings
///
/// On success the table is installed and every setting applied.
pub fn try_initialize(
    callbacks: HostCallbacks,
    caller_abi: &AbiLayout,
    settings: &RuntimeSettings,
) -> Result<()> {
    txmem_core::check_abi(caller_abi)?;
    let host = callbacks.validate()?;
    let cfg = config();
    cfg.install_host(host);
    cfg.apply(settings)?;
    tracing::debug!(settings = ?cfg.snapshot(), "txmem runtime initialized");
    Ok(())
}

/// Like [`try_initialize`], but any failure is fatal
///
/// A missing required callback or an ABI mismatch can never be recovered
/// from, so this is what hosts call at process start.
pub fn initialize(callbacks: HostCallbacks, caller_abi: &AbiLayout, settings: &RuntimeSettings) {
    if let Err(e) = try_initialize(callbacks, caller_abi, settings) {
        fatal!("runtime initialization failed: {}", e);
    }
}
