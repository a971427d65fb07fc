//! Single-flight guard for periodic passes.
//!
//! Each periodic component owns its own guard; overlapping invocations
//! collapse into a no-op "skipped" result instead of queuing or blocking.
//! The permit releases on drop, so the guard is never left held across
//! early returns, cancellation, or panics.

use std::sync::atomic::{AtomicBool, Ordering};

/// Ensures at most one execution of an operation runs at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the guard. Returns `None` when a flight is already
    /// in progress.
    pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit { flag: &self.busy })
    }

    /// Whether a flight is currently in progress.
    pub fn in_flight(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one flight; releases the guard on drop.
#[derive(Debug)]
pub struct FlightPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
