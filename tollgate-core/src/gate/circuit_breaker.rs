//! Circuit Breaker Pattern
//!
//! Tracks consecutive failures of a downstream dependency and temporarily
//! rejects requests once a threshold is reached. After the reset timeout the
//! breaker lets probe requests through (half-open) and closes again once
//! enough of them succeed.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Circuit open - requests are rejected
    Open,
    /// Testing if service recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// Consecutive half-open successes needed to close
    pub success_threshold: usize,
    /// Time to wait before letting a probe through
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(5),
        }
    }
}

impl CircuitBreakerConfig {
    /// Builder: set failure threshold
    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set success threshold
    pub fn with_success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Builder: set reset timeout
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    opened_at: Option<Instant>,
}

/// Circuit breaker for external service calls
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("default", config)
    }

    /// Create a breaker with a name used in log output
    pub fn named(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Get current state without triggering a transition
    pub fn state(&self) -> CircuitState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Check if a request is allowed.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open
    /// and admits the request.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    debug!(breaker = %self.name, "circuit half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    Self::close(&mut inner);
                    debug!(breaker = %self.name, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Self::open(&mut inner);
                    warn!(
                        breaker = %self.name,
                        failures = self.config.failure_threshold,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                Self::open(&mut inner);
                warn!(breaker = %self.name, "probe failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    fn open(inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    fn close(inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    /// Get consecutive failure count
    pub fn failure_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .failure_count
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Manually reset the circuit breaker
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Self::close(&mut inner);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = CircuitBreaker::default();

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_circuit_breaker_success_resets_count() {
        let cb = CircuitBreaker::default();

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_reset_timeout() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_reset_timeout(Duration::from_secs(5));
        let cb = CircuitBreaker::new(config);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!cb.allow_request());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_reset_timeout(Duration::from_millis(100));
        let cb = CircuitBreaker::new(config);

        cb.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // The open timer restarted with the probe failure
        assert!(!cb.allow_request());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_threshold_above_one() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_success_threshold(2)
            .with_reset_timeout(Duration::from_millis(10));
        let cb = CircuitBreaker::new(config);

        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breaker_reset() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(2);
        let cb = CircuitBreaker::new(config);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_config_builders() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(0)
            .with_success_threshold(5)
            .with_reset_timeout(Duration::from_secs(120));

        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.success_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(120));
    }
}
