use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use ::governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::errors::UpstreamError;
use crate::metrics::metrics;

/// Predicate deciding whether a failure means "slow down"
pub type RateLimitDetector = fn(&UpstreamError) -> bool;

/// Retry policy shared by the RPC and REST call paths
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Flat wait for ordinary failures, and the base of the exponential
    /// wait for rate-limited ones
    pub base_delay: Duration,

    /// Upper bound (exclusive) of the random jitter added to rate-limit waits
    pub max_jitter: Duration,

    rate_limit_detector: RateLimitDetector,

    /// Optional requests-per-second quota checked before every attempt
    quota: Option<Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_jitter", &self.max_jitter)
            .field("quota", &self.quota.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter: Duration::from_millis(1000),
            rate_limit_detector: UpstreamError::is_rate_limited,
            quota: None,
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_rate_limit_detector(mut self, detector: RateLimitDetector) -> Self {
        self.rate_limit_detector = detector;
        self
    }

    /// Cap attempts at `rps` per second across every call sharing this policy.
    /// Zero disables the quota.
    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.quota = NonZeroU32::new(rps)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        self
    }

    pub fn is_rate_limited(&self, err: &UpstreamError) -> bool {
        (self.rate_limit_detector)(err)
    }

    /// Deterministic part of the wait after failed attempt `attempt` (0-based)
    pub fn backoff_floor(&self, attempt: u32, rate_limited: bool) -> Duration {
        if rate_limited {
            self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
        } else {
            self.base_delay
        }
    }

    /// Full wait after failed attempt `attempt`, jitter included for rate limits
    pub fn delay_for(&self, attempt: u32, err: &UpstreamError) -> Duration {
        let rate_limited = self.is_rate_limited(err);
        let floor = self.backoff_floor(attempt, rate_limited);
        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        if rate_limited && max_jitter_ms > 0 {
            let jitter_ms = rand::thread_rng().gen_range(0..max_jitter_ms);
            floor + Duration::from_millis(jitter_ms)
        } else {
            floor
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    /// The error returned after exhaustion is the last one observed.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 0;
        loop {
            if let Some(quota) = &self.quota {
                quota.until_ready().await;
            }

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let rate_limited = self.is_rate_limited(&err);
            if rate_limited {
                metrics().rate_limited_total.inc();
            }

            if !err.is_retryable() {
                warn!(operation = operation_name, error = %err, "Permanent error, not retrying");
                return Err(err);
            }

            if attempt + 1 >= self.max_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempt + 1,
                    error = %err,
                    "All retry attempts exhausted"
                );
                return Err(err);
            }

            let backoff = self.delay_for(attempt, &err);
            debug!(
                operation = operation_name,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                rate_limited,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retrying after backoff"
            );
            metrics().retries_total.inc();
            sleep(backoff).await;
            attempt += 1;
        }
    }
}
