//! Concurrency and resilience primitives
//!
//! - [`RateLimiter`]: token bucket
//! - [`KeyedSemaphore`]: per-key counting semaphore with drop-released permits
//! - [`CircuitBreaker`]: closed / open / half-open breaker
//! - [`RetryPolicy`]: exponential backoff with jitter, feeding a breaker
//!
//! [`Gates`] bundles the instances an agent consults around model and tool
//! calls. It is shared by every agent built from the same runtime context.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;
pub mod semaphore;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;
pub use semaphore::{KeyedSemaphore, SemaphorePermit};

use crate::config::GateConfig;

/// Key used on the global semaphore for model calls
pub const MODEL_GATE_KEY: &str = "model";

/// Shared gate instances consulted by the agent loop.
///
/// Setters are meant for configuration time; they take effect for calls
/// that start afterwards.
#[derive(Debug, Default)]
pub struct Gates {
    model_rate_limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    tool_rate_limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    global_semaphore: RwLock<Option<KeyedSemaphore>>,
    tool_semaphore: RwLock<Option<KeyedSemaphore>>,
    per_tool_semaphores: RwLock<HashMap<String, KeyedSemaphore>>,
}

impl Gates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build gates from configuration.
    ///
    /// The configured model rate limit applies to every provider name that
    /// has no dedicated limiter; it is stored under `"*"`.
    pub fn from_config(config: &GateConfig) -> Self {
        let gates = Self::new();
        if let Some(limit) = &config.model_rate_limit {
            gates.set_model_rate_limiter("*", Arc::new(RateLimiter::from_config(limit)));
        }
        for (tool, limit) in &config.tool_rate_limits {
            gates.set_tool_rate_limiter(tool, Arc::new(RateLimiter::from_config(limit)));
        }
        if let Some(limit) = config.global_concurrency {
            gates.set_global_semaphore(KeyedSemaphore::new(limit));
        }
        if let Some(limit) = config.tool_concurrency {
            gates.set_tool_semaphore(KeyedSemaphore::new(limit));
        }
        for (tool, limit) in &config.per_tool_concurrency {
            gates.set_per_tool_semaphore(tool, KeyedSemaphore::new(*limit));
        }
        gates
    }

    pub fn set_model_rate_limiter(&self, provider: &str, limiter: Arc<RateLimiter>) {
        write(&self.model_rate_limiters).insert(provider.to_string(), limiter);
    }

    pub fn set_tool_rate_limiter(&self, tool: &str, limiter: Arc<RateLimiter>) {
        write(&self.tool_rate_limiters).insert(tool.to_string(), limiter);
    }

    pub fn set_global_semaphore(&self, semaphore: KeyedSemaphore) {
        *write(&self.global_semaphore) = Some(semaphore);
    }

    pub fn set_tool_semaphore(&self, semaphore: KeyedSemaphore) {
        *write(&self.tool_semaphore) = Some(semaphore);
    }

    pub fn set_per_tool_semaphore(&self, tool: &str, semaphore: KeyedSemaphore) {
        write(&self.per_tool_semaphores).insert(tool.to_string(), semaphore);
    }

    /// Limiter for a provider name, falling back to the `"*"` limiter
    pub fn model_rate_limiter(&self, provider: &str) -> Option<Arc<RateLimiter>> {
        let limiters = read(&self.model_rate_limiters);
        limiters.get(provider).or_else(|| limiters.get("*")).cloned()
    }

    pub fn tool_rate_limiter(&self, tool: &str) -> Option<Arc<RateLimiter>> {
        read(&self.tool_rate_limiters).get(tool).cloned()
    }

    pub fn global_semaphore(&self) -> Option<KeyedSemaphore> {
        read(&self.global_semaphore).clone()
    }

    /// Semaphore guarding a tool: its dedicated one, else the shared tool semaphore
    pub fn tool_semaphore(&self, tool: &str) -> Option<KeyedSemaphore> {
        if let Some(semaphore) = read(&self.per_tool_semaphores).get(tool) {
            return Some(semaphore.clone());
        }
        read(&self.tool_semaphore).clone()
    }

    /// Wait on the provider's rate limiter and take a global model slot
    pub async fn enter_model_call(&self, provider: &str) -> Option<SemaphorePermit> {
        if let Some(limiter) = self.model_rate_limiter(provider) {
            limiter.acquire(1.0).await;
        }
        match self.global_semaphore() {
            Some(semaphore) => Some(semaphore.acquire(MODEL_GATE_KEY).await),
            None => None,
        }
    }

    /// Wait on the tool's rate limiter and take its semaphore slot
    pub async fn enter_tool_call(&self, tool: &str) -> Option<SemaphorePermit> {
        if let Some(limiter) = self.tool_rate_limiter(tool) {
            limiter.acquire(1.0).await;
        }
        match self.tool_semaphore(tool) {
            Some(semaphore) => Some(semaphore.acquire(tool).await),
            None => None,
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
