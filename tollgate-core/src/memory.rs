//! Conversation memory strategies
//!
//! After each successful invocation the agent hands its full message list to
//! a [`MemoryStrategy`]; the returned list becomes the history for the next
//! invocation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::error::Result;
use crate::llm::{Message, Role};
use crate::tools::{Tool, call_tool};

/// Default number of messages a strategy keeps
pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// Transform applied to the conversation between invocations
#[async_trait]
pub trait MemoryStrategy: Send + Sync {
    async fn apply(&self, messages: Vec<Message>) -> Result<Vec<Message>>;

    /// Get the strategy name
    fn name(&self) -> &'static str;
}

/// Keeps the most recent messages
#[derive(Debug, Clone)]
pub struct RollingWindow {
    max_messages: usize,
}

impl RollingWindow {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

/// Keeps at most the last `n` messages without orphaning tool results.
///
/// The cut moves forward to the next user turn; when the tail holds none,
/// only the leading tool messages are dropped.
fn keep_last(mut messages: Vec<Message>, n: usize) -> Vec<Message> {
    let cut = messages.len().saturating_sub(n);
    let start = messages[cut..]
        .iter()
        .position(|m| m.role == Role::User)
        .or_else(|| messages[cut..].iter().position(|m| m.role != Role::Tool))
        .map_or(messages.len(), |offset| cut + offset);
    messages.drain(..start);
    messages
}

#[async_trait]
impl MemoryStrategy for RollingWindow {
    async fn apply(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        Ok(keep_last(messages, self.max_messages))
    }

    fn name(&self) -> &'static str {
        "rolling_window"
    }
}

/// Replaces overflow with one summary message.
///
/// When the history exceeds `max_messages`, the summary tool is called with
/// `{"text": <all contents joined by newlines>}` and its output becomes an
/// assistant message placed before the last `max_messages - 1` messages.
/// Without a summary tool this behaves like [`RollingWindow`].
#[derive(Clone)]
pub struct Summarized {
    max_messages: usize,
    summary_tool: Option<Arc<dyn Tool>>,
}

impl Summarized {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(2),
            summary_tool: None,
        }
    }

    pub fn with_summary_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.summary_tool = Some(tool);
        self
    }
}

impl Default for Summarized {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl std::fmt::Debug for Summarized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarized")
            .field("max_messages", &self.max_messages)
            .field("summary_tool", &self.summary_tool.as_ref().map(|t| t.name()))
            .finish()
    }
}

#[async_trait]
impl MemoryStrategy for Summarized {
    async fn apply(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        if messages.len() <= self.max_messages {
            return Ok(messages);
        }
        let Some(tool) = &self.summary_tool else {
            return Ok(keep_last(messages, self.max_messages));
        };

        let transcript = messages
            .iter()
            .map(Message::text)
            .collect::<Vec<_>>()
            .join("\n");
        let summary = call_tool(tool.as_ref(), json!({ "text": transcript })).await?;
        tracing::debug!(
            summarized = messages.len(),
            tool = tool.name(),
            "Summarized conversation"
        );

        let mut kept = vec![Message::assistant(summary.to_text()).with_name("summary")];
        kept.extend(keep_last(messages, self.max_messages - 1));
        Ok(kept)
    }

    fn name(&self) -> &'static str {
        "summarized"
    }
}
