//! Gated tool execution
//!
//! `ToolRuntime` wraps every tool call in the shared gates:
//! 1. Tool rate limiter (if configured for the tool name)
//! 2. Semaphore slot (dedicated per-tool, else the shared tool semaphore)
//! 3. Argument validation and invocation under an optional timeout
//!
//! The semaphore slot is held by a permit and returned on every exit path,
//! including failures and timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::result::ToolOutput;
use super::tool::{Tool, call_tool};
use crate::error::{Result, TollgateError};
use crate::gate::Gates;

/// Configuration for the tool runtime
#[derive(Debug, Clone, Default)]
pub struct ToolRuntimeConfig {
    /// Timeout applied when a call does not supply one
    pub default_timeout: Option<Duration>,

    /// Per-tool timeout overrides
    pub tool_timeouts: HashMap<String, Duration>,
}

impl ToolRuntimeConfig {
    /// Create a config with a default timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Add a tool-specific timeout
    pub fn with_tool_timeout(mut self, tool_name: impl Into<String>, timeout: Duration) -> Self {
        self.tool_timeouts.insert(tool_name.into(), timeout);
        self
    }
}

/// Executes tools behind the shared gates
#[derive(Debug, Clone)]
pub struct ToolRuntime {
    gates: Arc<Gates>,
    config: ToolRuntimeConfig,
}

impl ToolRuntime {
    pub fn new(gates: Arc<Gates>, config: ToolRuntimeConfig) -> Self {
        Self { gates, config }
    }

    pub fn gates(&self) -> &Arc<Gates> {
        &self.gates
    }

    fn timeout_for(&self, tool_name: &str, requested: Option<Duration>) -> Option<Duration> {
        requested
            .or_else(|| self.config.tool_timeouts.get(tool_name).copied())
            .or(self.config.default_timeout)
    }

    /// Execute a tool.
    ///
    /// `requested_timeout` takes precedence over configured timeouts. On
    /// expiry the invocation is dropped and a tool error naming the bound
    /// is returned.
    pub async fn execute(
        &self,
        tool: &dyn Tool,
        args: Value,
        requested_timeout: Option<Duration>,
    ) -> Result<ToolOutput> {
        let tool_name = tool.name().to_string();
        let _permit = self.gates.enter_tool_call(&tool_name).await;

        match self.timeout_for(&tool_name, requested_timeout) {
            Some(limit) => match timeout(limit, call_tool(tool, args)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(tool = %tool_name, ?limit, "tool call timed out");
                    Err(TollgateError::Tool(format!(
                        "Tool {} exceeded timeout of {:?}",
                        tool_name, limit
                    )))
                }
            },
            None => {
                debug!(tool = %tool_name, "executing tool without timeout");
                call_tool(tool, args).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gate::KeyedSemaphore;
    use crate::tools::FnTool;

    fn sleepy(delay: Duration) -> FnTool {
        FnTool::new("sleepy", move |_args| async move {
            tokio::time::sleep(delay).await;
            Ok("awake")
        })
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let gates = Arc::new(Gates::new());
        let semaphore = KeyedSemaphore::new(1);
        gates.set_per_tool_semaphore("sleepy", semaphore.clone());
        let runtime = ToolRuntime::new(gates, ToolRuntimeConfig::default());

        let err = runtime
            .execute(
                &sleepy(Duration::from_millis(100)),
                json!({}),
                Some(Duration::from_millis(10)),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timeout"));
        assert_eq!(semaphore.acquired_total(), 1);
        assert_eq!(semaphore.released_total(), 1);
        assert_eq!(semaphore.in_flight("sleepy"), 0);
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        let config = ToolRuntimeConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_tool_timeout("sleepy", Duration::from_millis(5));
        let runtime = ToolRuntime::new(Arc::new(Gates::new()), config);

        let result = runtime
            .execute(&sleepy(Duration::from_millis(200)), json!({}), None)
            .await;
        assert!(matches!(result, Err(TollgateError::Tool(_))));
    }

    #[tokio::test]
    async fn test_failure_releases_slot() {
        let gates = Arc::new(Gates::new());
        let shared = KeyedSemaphore::new(2);
        gates.set_tool_semaphore(shared.clone());
        let runtime = ToolRuntime::new(gates, ToolRuntimeConfig::default());
        let failing = FnTool::new("failing", |_args| async move {
            Err::<String, _>(TollgateError::Other("nope".into()))
        });

        let err = runtime.execute(&failing, json!({}), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool error: nope");
        assert_eq!(shared.in_flight("failing"), 0);
        assert_eq!(shared.released_total(), 1);
    }
}
