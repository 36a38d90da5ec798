//! Cooperative cancellation for a running enrichment.
//!
//! Workers observe the signal **between** rows, never mid network call:
//! a long geocoding request completes or times out on its own, so
//! already-completed rows and cache entries stay valid and usable on a
//! resumed run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag for a run. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    /// Creates a fresh, un-triggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the run stop after the rows currently in flight.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// `true` once [`StopSignal::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_stopped());
        signal.stop();
        assert!(clone.is_stopped());
    }
}
