//! # Tollgate - Gated Tool-Calling Agents
//!
//! Tollgate runs a language-model agent loop that decides when to call tools,
//! and puts every model and tool call behind shared gates:
//! - Token-bucket rate limits per provider and per tool
//! - Counting semaphores bounding concurrent calls
//! - Retry with exponential backoff, feeding a circuit breaker
//! - Per-call tool timeouts that always release their permits
//!
//! Around the loop sit lifecycle hooks, per-invocation event channels,
//! conversation memory strategies, safety filters, session persistence,
//! multi-agent routing and an MCP client for remote tool hosts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let provider = Arc::new(ScriptedProvider::new().with_text("Hello!"));
//!     let agent = Agent::builder()
//!         .name("greeter")
//!         .provider(provider)
//!         .build()
//!         .await?;
//!
//!     let answer = agent.call("Say hello").await?;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Agent**: the tool loop, streaming, structured output and interrupts
//! - **Gates**: rate limiters, semaphores and circuit breakers shared through
//!   a [`runtime::RuntimeContext`]
//! - **Events**: hooks observe every invocation; `run_events` returns one
//!   invocation's ordered event list
//! - **MCP**: remote tools over newline-delimited JSON-RPC

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod hooks;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod routing;
pub mod runtime;
pub mod safety;
pub mod session;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{Agent, AgentBuilder, AgentResult, CallOptions, Interrupt};
    pub use crate::config::{AgentConfig, GateConfig, ServerConfig, TollgateConfig};
    pub use crate::error::{Result, TollgateError};
    pub use crate::events::{AgentEvent, EventKind, StopReason, event_channel};
    pub use crate::gate::{
        CircuitBreaker, CircuitBreakerConfig, CircuitState, Gates, KeyedSemaphore,
        RateLimitConfig, RateLimiter, RetryPolicy,
    };
    pub use crate::hooks::{CallbackId, HookProvider, HookRegistry, LoggingHook};
    pub use crate::llm::{
        Message, MessageContent, ModelOptions, ModelProvider, ModelRequest, ModelResponse,
        ResilientProvider, Role, ScriptedProvider, StreamChunk, TokenUsage, ToolCall, ToolChoice,
    };
    pub use crate::mcp::{McpClient, McpSession, RemoteTool};
    pub use crate::memory::{MemoryStrategy, RollingWindow, Summarized};
    pub use crate::routing::{
        AgentGraph, KeywordRouter, MultiAgent, Responder, Router, ScoringRouter,
    };
    pub use crate::runtime::RuntimeContext;
    pub use crate::safety::{BlocklistFilter, SafetyFilter};
    pub use crate::session::{
        FileRepository, FileStore, InMemoryRepository, InMemoryStore, MessageStore,
        SessionRepository,
    };
    pub use crate::tools::{
        FnTool, Tool, ToolDefinition, ToolOutput, ToolRegistry, ToolResult, ToolRuntime,
    };
}
