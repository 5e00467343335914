//! Cooperative process lifecycle signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "should keep running" flag.
///
/// Cloning yields a handle to the same flag. The capture loop polls it once
/// per iteration and before every retry sleep.
#[derive(Debug, Clone)]
pub struct Shutdown {
    running: Arc<AtomicBool>,
}

impl Shutdown {
    /// Creates a flag in the running state.
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns true until [`Shutdown::trigger`] has been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests shutdown.
    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Installs a Ctrl-C handler that triggers this flag.
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let handle = self.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown requested");
            handle.trigger();
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
