//! Signal flags polled by the scheduler.
//!
//! SIGTERM/SIGINT request shutdown, SIGHUP drops the settings cache, SIGUSR1
//! runs a pass immediately. Handlers only flip atomics; the scheduler reads
//! them between ticks.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flags shared between OS signal hooks and the scheduler loop.
#[derive(Clone, Default)]
pub struct SignalFlags {
    shutdown: Arc<AtomicBool>,
    invalidate: Arc<AtomicBool>,
    run_now: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Flags with no OS hooks attached; only the `request_*` methods set them.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags wired to process signals. Registration failures are reported on
    /// stderr and otherwise ignored.
    #[cfg(feature = "daemon")]
    #[must_use]
    pub fn install() -> Self {
        let flags = Self::new();
        flags.register();
        flags
    }

    /// Shutdown stays latched once requested.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Read and clear the cache-invalidation request.
    pub fn take_invalidate(&self) -> bool {
        self.invalidate.swap(false, Ordering::Relaxed)
    }

    /// Read and clear the run-now request.
    pub fn take_run_now(&self) -> bool {
        self.run_now.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn request_invalidate(&self) {
        self.invalidate.store(true, Ordering::Relaxed);
    }

    pub fn request_run_now(&self) {
        self.run_now.store(true, Ordering::Relaxed);
    }

    #[cfg(feature = "daemon")]
    fn register(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        for (sig, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&self.shutdown)) {
                eprintln!("[FAP-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.invalidate)) {
                eprintln!("[FAP-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.run_now)) {
                eprintln!("[FAP-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}
