//! Minimum-interval pacing gate for external services.
//!
//! The external services rate-limit by source address, so pacing must be
//! a single global serialization point per service — one shared gate, no
//! matter how many workers are calling. The gate is an explicit owned
//! object handed to every client of that service, never process-wide
//! state.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Enforces a minimum interval between consecutive calls to one service.
pub struct PacingGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl PacingGate {
    /// Creates a gate with the given minimum interval between calls.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::const_new(None),
        }
    }

    /// The configured minimum interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Blocks until at least `min_interval` has elapsed since the last
    /// acquisition, then stamps the current time.
    ///
    /// The gate stays held across the wait, so concurrent acquirers
    /// queue and each release is spaced a full interval from the
    /// previous one.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_acquire_is_immediate() {
        let gate = PacingGate::new(Duration::from_millis(200));
        let start = Instant::now();
        gate.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn serial_acquires_are_spaced() {
        let gate = PacingGate::new(Duration::from_millis(50));
        let start = Instant::now();
        gate.acquire().await;
        gate.acquire().await;
        gate.acquire().await;
        // Two inter-call gaps of >= 50ms each.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn concurrent_acquires_queue_through_one_gate() {
        let gate = Arc::new(PacingGate::new(Duration::from_millis(40)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move { gate.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 4 calls through one gate: at least 3 full intervals.
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
