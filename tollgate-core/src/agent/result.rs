//! Invocation options and outcomes

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::StopReason;
use crate::llm::{Message, ModelOptions, TokenUsage, ToolCall};
use crate::tools::ToolResult;

/// A cooperative cancellation request.
///
/// Set on an agent before a call; the next call consumes it and returns
/// without contacting the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interrupt {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Interrupt {
    pub fn new(reason: impl Into<String>, message: Option<String>) -> Self {
        Self {
            reason: reason.into(),
            message,
        }
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Model rounds allowed before the call fails
    pub max_iterations: Option<usize>,

    /// Request schema-shaped output for this call
    pub structured_schema: Option<Value>,

    /// Bound on each tool invocation
    pub tool_timeout: Option<Duration>,

    pub model_options: ModelOptions,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.structured_schema = Some(schema);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_model_options(mut self, options: ModelOptions) -> Self {
        self.model_options = options;
        self
    }
}

/// Terminal outcome of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    /// Final answer text; empty for interrupted calls
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,

    /// Usage summed over every model round of the call
    pub usage: TokenUsage,

    /// Final assistant message, when the call ended on one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    pub stop_reason: StopReason,

    #[serde(default)]
    pub tool_results: Vec<ToolResult>,

    /// Tool calls the model requested, in order
    #[serde(default)]
    pub tool_uses: Vec<ToolCall>,

    #[serde(default)]
    pub interrupts: Vec<Interrupt>,
}

impl AgentResult {
    pub(crate) fn new(stop_reason: StopReason) -> Self {
        Self {
            text: String::new(),
            structured_output: None,
            usage: TokenUsage::default(),
            message: None,
            stop_reason,
            tool_results: Vec::new(),
            tool_uses: Vec::new(),
            interrupts: Vec::new(),
        }
    }

    pub(crate) fn interrupted(stop_reason: StopReason, interrupt: Interrupt) -> Self {
        let mut result = Self::new(stop_reason);
        result.interrupts.push(interrupt);
        result
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(
            self.stop_reason,
            StopReason::Interrupted | StopReason::GuardrailIntervened
        )
    }
}
