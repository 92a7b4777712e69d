//! Shared runtime context
//!
//! Everything agents share for the lifetime of a process lives here and is
//! passed to them explicitly: the default model provider, the gate
//! registry, the hook bus and the loaded configuration.

use std::sync::Arc;

use crate::config::TollgateConfig;
use crate::error::Result;
use crate::gate::{CircuitBreaker, Gates};
use crate::hooks::HookRegistry;
use crate::llm::{ModelProvider, ResilientProvider};
use crate::tools::ToolRuntimeConfig;

/// Long-lived state shared by agents
pub struct RuntimeContext {
    default_provider: Option<Arc<dyn ModelProvider>>,
    gates: Arc<Gates>,
    hooks: Arc<HookRegistry>,
    config: TollgateConfig,
}

impl RuntimeContext {
    /// Context with default configuration and no gates
    pub fn new() -> Self {
        Self {
            default_provider: None,
            gates: Arc::new(Gates::new()),
            hooks: Arc::new(HookRegistry::new()),
            config: TollgateConfig::default(),
        }
    }

    /// Validate `config` and build the gates it describes
    pub fn from_config(config: &TollgateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            default_provider: None,
            gates: Arc::new(Gates::from_config(&config.gates)),
            hooks: Arc::new(HookRegistry::new()),
            config: config.clone(),
        })
    }

    pub fn with_default_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// Use `provider` as the default, wrapped in the configured retry
    /// policy and a circuit breaker named after it
    pub fn with_resilient_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        let breaker = CircuitBreaker::named(
            provider.model_info().provider,
            self.config.gates.circuit_breaker.clone(),
        );
        self.default_provider = Some(Arc::new(ResilientProvider::new(
            provider,
            self.config.gates.retry.clone(),
            Arc::new(breaker),
        )));
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn default_provider(&self) -> Option<Arc<dyn ModelProvider>> {
        self.default_provider.clone()
    }

    pub fn gates(&self) -> &Arc<Gates> {
        &self.gates
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn config(&self) -> &TollgateConfig {
        &self.config
    }

    /// Tool runtime settings derived from the agent section
    pub fn tool_runtime_config(&self) -> ToolRuntimeConfig {
        ToolRuntimeConfig {
            default_timeout: self.config.agent.tool_timeout,
            ..Default::default()
        }
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field(
                "default_provider",
                &self.default_provider.as_ref().map(|p| p.model_info()),
            )
            .field("gates", &self.gates)
            .field("hooks", &self.hooks)
            .finish()
    }
}
