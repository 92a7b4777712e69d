//! Retry Logic for Outbound Calls
//!
//! Implements exponential backoff with jitter for transient failures and
//! feeds every final outcome to an optional circuit breaker.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use crate::error::{Result, TollgateError};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Builder: set max retries
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder: set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Builder: set max delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Builder: set jitter fraction
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Delay before retry number `attempt` (1-indexed), without jitter
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry number `attempt`, with jitter applied
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1.0 + self.jitter * rand::thread_rng().r#gen::<f64>();
        self.backoff(attempt).mul_f64(factor)
    }

    /// Run `operation`, retrying retryable failures.
    ///
    /// The breaker, when given, is consulted once before the first attempt.
    /// A refused run fails with [`TollgateError::CircuitOpen`] without
    /// attempting or sleeping.
    pub async fn run<F, Fut, T>(
        &self,
        breaker: Option<&CircuitBreaker>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(breaker) = breaker
            && !breaker.allow_request()
        {
            return Err(TollgateError::CircuitOpen);
        }

        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if let Some(breaker) = breaker {
                        breaker.record_success();
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, error = %err, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if let Some(breaker) = breaker {
                        breaker.record_failure();
                    }
                    if err.is_retryable() {
                        warn!(attempts = attempt + 1, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}
