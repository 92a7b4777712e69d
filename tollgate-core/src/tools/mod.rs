//! Tool system for agent capabilities
//!
//! - [`Tool`]: the trait every callable capability implements
//! - [`FnTool`]: a tool backed by an async closure
//! - [`ToolRegistry`]: name-to-tool map shared by agents
//! - [`ToolRuntime`]: gated execution with rate limits, semaphores and timeouts
//! - [`StructuredOutputTool`]: the synthetic schema tool for structured output
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tollgate_core::gate::Gates;
//! use tollgate_core::tools::{FnTool, ToolRegistry, ToolRuntime, ToolRuntimeConfig};
//!
//! # async fn run() -> tollgate_core::error::Result<()> {
//! let registry = ToolRegistry::new();
//! registry.register(Arc::new(FnTool::new("echo", |args| async move { Ok(args) })))?;
//!
//! let runtime = ToolRuntime::new(Arc::new(Gates::new()), ToolRuntimeConfig::default());
//! let echo = registry.require("echo")?;
//! let output = runtime.execute(echo.as_ref(), json!({"text": "hi"}), None).await?;
//! # Ok(())
//! # }
//! ```

mod registry;
mod result;
mod runtime;
mod structured_output;
mod tool;

pub use registry::{RegistryError, ToolRegistry};
pub use result::{ToolOutput, ToolResult};
pub use runtime::{ToolRuntime, ToolRuntimeConfig};
pub use structured_output::{
    STRUCTURED_OUTPUT_RETRY_PROMPT, STRUCTURED_OUTPUT_TOOL, StructuredOutputTool,
};
pub use tool::{FnTool, Tool, ToolDefinition, call_tool, empty_schema, missing_required};

#[cfg(test)]
mod tests;
