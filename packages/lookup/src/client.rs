//! Rate-limited, retrying wrapper around a single external lookup.
//!
//! Every call first acquires the service's shared [`PacingGate`], then
//! runs the lookup with a per-call timeout. Transient failures (timeout,
//! transport, unexpected response) are retried with a fixed delay up to
//! the attempt budget; a well-formed "not found" returns immediately —
//! retrying a definitive negative only wastes quota.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use geo_enrich_models::Resolution;

use crate::LookupError;
use crate::pacing::PacingGate;
use crate::registry::ServiceConfig;

/// Wraps one external lookup with pacing, timeout, and bounded retry.
pub struct RateLimitedClient {
    gate: Arc<PacingGate>,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
    label: &'static str,
}

impl RateLimitedClient {
    /// Creates a client around a shared pacing gate.
    ///
    /// `label` names the service in log messages. A zero `max_attempts`
    /// is treated as 1.
    #[must_use]
    pub fn new(
        gate: Arc<PacingGate>,
        timeout: Duration,
        max_attempts: u32,
        retry_delay: Duration,
        label: &'static str,
    ) -> Self {
        Self {
            gate,
            timeout,
            max_attempts: max_attempts.max(1),
            retry_delay,
            label,
        }
    }

    /// Creates a client (and its gate) from a TOML service definition.
    #[must_use]
    pub fn from_service(config: &ServiceConfig, label: &'static str) -> Self {
        Self::new(
            Arc::new(PacingGate::new(Duration::from_millis(config.rate_limit_ms))),
            Duration::from_secs(config.timeout_secs),
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
            label,
        )
    }

    /// Per-call timeout, for building the underlying HTTP request.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The shared pacing gate (one per external service).
    #[must_use]
    pub fn gate(&self) -> Arc<PacingGate> {
        Arc::clone(&self.gate)
    }

    /// Runs `op` through the pacing gate with bounded retry.
    ///
    /// `Found`/`NotFound` return immediately; errors are retried up to
    /// the attempt budget with a fixed inter-attempt delay.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Exhausted`] wrapping the final attempt's
    /// error once the budget is spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<Resolution<T>, LookupError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Resolution<T>, LookupError>>,
    {
        let mut last_err: Option<LookupError> = None;

        for attempt in 1..=self.max_attempts {
            self.gate.acquire().await;

            match op().await {
                Ok(resolution) => return Ok(resolution),
                Err(e) => {
                    log::warn!(
                        "[{}] attempt {attempt}/{}: {e}",
                        self.label,
                        self.max_attempts
                    );
                    last_err = Some(e);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(LookupError::Exhausted {
            attempts: self.max_attempts,
            last: Box::new(last_err.unwrap_or(LookupError::Status(0))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_client(max_attempts: u32) -> RateLimitedClient {
        RateLimitedClient::new(
            Arc::new(PacingGate::new(Duration::from_millis(1))),
            Duration::from_secs(1),
            max_attempts,
            Duration::from_millis(1),
            "test",
        )
    }

    #[tokio::test]
    async fn found_returns_without_retry() {
        let calls = AtomicU32::new(0);
        let client = quick_client(3);

        let result = client
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Resolution::Found(42)) }
            })
            .await
            .unwrap();

        assert_eq!(result, Resolution::Found(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let client = quick_client(3);

        let result: Resolution<u32> = client
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Resolution::NotFound) }
            })
            .await
            .unwrap();

        assert_eq!(result, Resolution::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let client = quick_client(3);

        let result = client
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(LookupError::Status(503))
                    } else {
                        Ok(Resolution::Found("ok"))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, Resolution::Found("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_attempts() {
        let calls = AtomicU32::new(0);
        let client = quick_client(2);

        let err = client
            .run::<(), _, _>(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LookupError::RateLimited) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match err {
            LookupError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, LookupError::RateLimited));
            }
            other => panic!("expected Exhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn calls_are_paced_by_the_gate() {
        let client = RateLimitedClient::new(
            Arc::new(PacingGate::new(Duration::from_millis(30))),
            Duration::from_secs(1),
            1,
            Duration::from_millis(1),
            "paced",
        );

        let start = std::time::Instant::now();
        for _ in 0..3 {
            let _ = client
                .run(|| async { Ok::<_, LookupError>(Resolution::Found(())) })
                .await;
        }
        // 3 calls through a 30ms gate: at least 2 intervals of wall time.
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
