//! Transaction engine integration tests
//!
//! Exercises the public surface end to end: nesting, deferred effects,
//! memory restoration, open code validation, process-wide configuration
//! and the transaction-aware adaptors.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test transactions
//!
//! # Run the worked scenarios only
//! cargo test --test transactions scenarios::
//! ```
//!
//! Every test holds a [`TestEnv`]: the runtime configuration is shared by
//! the whole process, so tests that change it must not overlap.

use parking_lot::{const_mutex, Mutex, MutexGuard};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use txmem::config;
use txmem::txmem_engine::reset_validation_stats;
use txmem::txmem_runtime::Host;

// Test modules
pub mod configuration;
pub mod nesting;
pub mod properties;
pub mod scenarios;
pub mod validation;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

static CONFIG_LOCK: Mutex<()> = const_mutex(());
static INIT_LOGGING: Once = Once::new();

/// Route engine logs to the test writer
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// Exclusive access to the runtime configuration, reset on both ends
pub struct TestEnv {
    _lock: MutexGuard<'static, ()>,
}

impl TestEnv {
    pub fn new() -> Self {
        init_test_logging();
        let lock = CONFIG_LOCK.lock();
        config().reset();
        config().install_host(Host::default());
        reset_validation_stats();
        TestEnv { _lock: lock }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        config().reset();
        config().install_host(Host::default());
    }
}

/// Ordered record of events observed by a test
#[derive(Clone, Default)]
pub struct Events(Rc<RefCell<Vec<&'static str>>>);

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that records `name` when called
    pub fn note(&self, name: &'static str) -> impl FnOnce() + 'static {
        let events = self.clone();
        move || events.0.borrow_mut().push(name)
    }

    pub fn push(&self, name: &'static str) {
        self.0.borrow_mut().push(name);
    }

    pub fn snapshot(&self) -> Vec<&'static str> {
        self.0.borrow().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.0.borrow().iter().filter(|e| **e == name).count()
    }
}
