//! Configuration types for the Tollgate runtime

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};
use crate::gate::{CircuitBreakerConfig, RateLimitConfig, RetryPolicy};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TollgateConfig {
    /// Agent loop defaults
    pub agent: AgentConfig,

    /// Rate limits, concurrency ceilings, breaker and retry
    pub gates: GateConfig,

    /// Per-invocation event channel settings
    pub events: EventConfig,

    /// Named tool hosts reachable over stdio JSON-RPC
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub servers: HashMap<String, ServerConfig>,
}

/// Agent loop defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Model round-trips allowed per invocation
    pub max_iterations: usize,

    /// Wall-clock bound for a single tool call
    #[serde(
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_timeout: Option<Duration>,

    /// Keep conversation history between invocations
    pub memory: bool,

    /// Messages kept by the default rolling-window strategy
    pub window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            tool_timeout: None,
            memory: true,
            window: 20,
        }
    }
}

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Token bucket applied to every model call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_rate_limit: Option<RateLimitConfig>,

    /// Token buckets keyed by tool name
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tool_rate_limits: HashMap<String, RateLimitConfig>,

    /// Concurrent model calls across all agents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_concurrency: Option<usize>,

    /// Concurrent calls per tool name, shared semaphore
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_concurrency: Option<usize>,

    /// Dedicated concurrency ceilings keyed by tool name
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub per_tool_concurrency: HashMap<String, usize>,

    pub circuit_breaker: CircuitBreakerConfig,

    pub retry: RetryPolicy,
}

/// Event channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventConfig {
    /// Capacity of the per-invocation event channel
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// A tool host launched as a child process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl TollgateConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `tollgate.toml` in the working directory, then the file named by
    ///    `TOLLGATE_CONFIG_PATH`
    /// 3. `TOLLGATE_` environment variables, `__` separating nested keys
    ///    (`TOLLGATE_AGENT__MAX_ITERATIONS=8`)
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a source is malformed or the result
    /// fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(TollgateConfig::default()))
            .merge(Toml::file("tollgate.toml"));

        if let Ok(path) = std::env::var("TOLLGATE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: TollgateConfig = figment
            .merge(Env::prefixed("TOLLGATE_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                TollgateError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: TollgateConfig =
            Figment::from(Serialized::defaults(TollgateConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .extract()
                .map_err(|e| {
                    TollgateError::Configuration(format!(
                        "Failed to load configuration file: {}",
                        e
                    ))
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            return Err(TollgateError::Configuration(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.events.buffer_size == 0 {
            return Err(TollgateError::Configuration(
                "events.buffer_size must be at least 1".into(),
            ));
        }

        let limits = self
            .gates
            .model_rate_limit
            .iter()
            .map(|limit| ("model", limit))
            .chain(
                self.gates
                    .tool_rate_limits
                    .iter()
                    .map(|(name, limit)| (name.as_str(), limit)),
            );
        for (name, limit) in limits {
            if !(limit.rate > 0.0) {
                return Err(TollgateError::Configuration(format!(
                    "rate limit for '{}' must be positive",
                    name
                )));
            }
        }

        let ceilings = self
            .gates
            .global_concurrency
            .into_iter()
            .chain(self.gates.tool_concurrency)
            .chain(self.gates.per_tool_concurrency.values().copied());
        if ceilings.into_iter().any(|limit| limit == 0) {
            return Err(TollgateError::Configuration(
                "concurrency limits must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.gates.retry.jitter) {
            return Err(TollgateError::Configuration(
                "gates.retry.jitter must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }
}
