//! Model Context Protocol (MCP) Client
//!
//! Connects to external tool hosts over newline-delimited JSON-RPC 2.0 and
//! exposes their tools to agents through the [`Tool`](crate::tools::Tool)
//! trait.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate_core::agent::Agent;
//! use tollgate_core::mcp::McpClient;
//! # use tollgate_core::llm::ModelProvider;
//!
//! # async fn run(provider: Arc<dyn ModelProvider>) -> tollgate_core::error::Result<()> {
//! let client = McpClient::stdio("files", "mcp-files", vec!["--root".into(), ".".into()]);
//!
//! let answer = client
//!     .with_session(|tools| async move {
//!         let agent = Agent::builder()
//!             .provider(provider)
//!             .tools(tools)
//!             .build()
//!             .await?;
//!         agent.call("List the files here").await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol Overview
//!
//! A session runs `initialize`, sends `notifications/initialized`, and then
//! issues `tools/list` and `tools/call` requests one at a time. Request ids
//! increase from 1 per session.

mod client;
mod protocol;
mod transport;

pub use client::{McpClient, McpSession, RemoteTool};
pub use protocol::*;
pub use transport::{StdioTransport, StreamTransport, Transport};
