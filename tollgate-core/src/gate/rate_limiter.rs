//! Token-bucket rate limiter
//!
//! Tokens refill continuously at `rate` per second up to `burst`. A caller
//! short of tokens sleeps for the computed deficit (at most
//! [`MAX_WAIT`]) and then takes whatever is available. Admission is
//! best-effort: concurrent callers sharing one limiter may be slightly
//! over-admitted.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Longest single wait inside [`RateLimiter::acquire`]
pub const MAX_WAIT: Duration = Duration::from_secs(10);

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second
    pub rate: f64,
    /// Bucket capacity; defaults to `rate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<f64>,
}

impl RateLimitConfig {
    pub fn new(rate: f64) -> Self {
        Self { rate, burst: None }
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = Some(burst);
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared across concurrent callers
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with `rate` tokens per second and `burst` capacity.
    ///
    /// `burst` defaults to `rate`. The bucket starts full.
    pub fn new(rate: f64, burst: Option<f64>) -> Self {
        let rate = if rate > 0.0 { rate } else { f64::MIN_POSITIVE };
        let capacity = burst.unwrap_or(rate).max(0.0);
        Self {
            rate,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.rate, config.burst)
    }

    /// Tokens per second
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Bucket capacity
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens currently available, after refilling
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Take `n` tokens, sleeping for the deficit if the bucket is short.
    ///
    /// Returns whether the tokens were actually consumed; after the single
    /// bounded wait a still-short bucket admits the caller without
    /// consuming.
    pub async fn acquire(&self, n: f64) -> bool {
        let wait = {
            let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
            self.refill(&mut bucket);
            if bucket.tokens >= n {
                bucket.tokens -= n;
                return true;
            }
            let deficit = (n - bucket.tokens) / self.rate;
            Duration::from_secs_f64(deficit.clamp(0.0, MAX_WAIT.as_secs_f64()))
        };

        debug!(?wait, tokens = n, "rate limiter waiting");
        tokio::time::sleep(wait).await;

        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket);
        if bucket.tokens >= n {
            bucket.tokens -= n;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_does_not_block() {
        let limiter = RateLimiter::new(2.0, Some(3.0));
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.acquire(1.0).await);
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_token_waits_one_interval() {
        let limiter = RateLimiter::new(4.0, Some(2.0));
        limiter.acquire(1.0).await;
        limiter.acquire(1.0).await;

        let start = Instant::now();
        assert!(limiter.acquire(1.0).await);
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(249), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(260), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_defaults_to_rate() {
        let limiter = RateLimiter::new(5.0, None);
        assert_eq!(limiter.capacity(), 5.0);
        assert!((limiter.available() - 5.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let limiter = RateLimiter::new(10.0, Some(2.0));
        limiter.acquire(2.0).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!((limiter.available() - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_clamped() {
        let limiter = RateLimiter::new(0.01, Some(1.0));
        limiter.acquire(1.0).await;

        let start = Instant::now();
        let consumed = limiter.acquire(1.0).await;

        let waited = start.elapsed();
        assert!(waited >= MAX_WAIT && waited < MAX_WAIT + Duration::from_millis(10));
        assert!(!consumed);
    }
}
