//! Event emission for a single invocation

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::events::{AgentEvent, EventSink, StopReason};
use crate::hooks::HookRegistry;
use crate::llm::{Message, ModelResponse, ToolCall};

/// Sends one invocation's events to the hook bus and its own sink.
///
/// Both deliveries are fire-and-forget.
pub(crate) struct InvocationEmitter<'a> {
    hooks: &'a HookRegistry,
    sink: EventSink,
    invocation_id: String,
}

impl<'a> InvocationEmitter<'a> {
    pub(crate) fn new(hooks: &'a HookRegistry, sink: EventSink) -> Self {
        Self {
            hooks,
            sink,
            invocation_id: Uuid::new_v4().to_string(),
        }
    }

    pub(crate) fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    async fn emit(&self, event: AgentEvent) {
        self.hooks.emit(&event);
        self.sink.send(event).await;
    }

    pub(crate) async fn started(&self, agent_name: &str, prompt: &str) {
        self.emit(AgentEvent::InvocationStarted {
            invocation_id: self.invocation_id.clone(),
            agent_name: agent_name.to_string(),
            prompt: prompt.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn message_added(&self, message: &Message) {
        self.emit(AgentEvent::MessageAdded {
            invocation_id: self.invocation_id.clone(),
            message: message.clone(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn before_model_call(
        &self,
        iteration: usize,
        message_count: usize,
        tool_count: usize,
    ) {
        self.emit(AgentEvent::BeforeModelCall {
            invocation_id: self.invocation_id.clone(),
            iteration,
            message_count,
            tool_count,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn after_model_call(
        &self,
        iteration: usize,
        response: Result<&ModelResponse, String>,
    ) {
        let (tool_calls, usage, error) = match response {
            Ok(response) => (response.tool_calls.len(), response.usage, None),
            Err(error) => (0, None, Some(error)),
        };
        self.emit(AgentEvent::AfterModelCall {
            invocation_id: self.invocation_id.clone(),
            iteration,
            tool_calls,
            usage,
            error,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn before_tool_call(&self, call: &ToolCall) {
        self.emit(AgentEvent::BeforeToolCall {
            invocation_id: self.invocation_id.clone(),
            tool_call: call.clone(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn after_tool_call(
        &self,
        call: &ToolCall,
        duration_ms: u64,
        error: Option<String>,
    ) {
        self.emit(AgentEvent::AfterToolCall {
            invocation_id: self.invocation_id.clone(),
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: error.is_none(),
            duration_ms,
            error,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn text_delta(&self, delta: &str) {
        self.emit(AgentEvent::TextDelta {
            invocation_id: self.invocation_id.clone(),
            delta: delta.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn structured_output(&self, value: &Value) {
        self.emit(AgentEvent::StructuredOutput {
            invocation_id: self.invocation_id.clone(),
            value: value.clone(),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn interrupted(&self, reason: &str, message: Option<&str>) {
        self.emit(AgentEvent::Interrupted {
            invocation_id: self.invocation_id.clone(),
            reason: reason.to_string(),
            message: message.map(str::to_string),
            timestamp: Utc::now(),
        })
        .await;
    }

    pub(crate) async fn completed(
        &self,
        stop_reason: Option<StopReason>,
        error: Option<String>,
        duration_ms: u64,
    ) {
        self.emit(AgentEvent::InvocationCompleted {
            invocation_id: self.invocation_id.clone(),
            stop_reason,
            error,
            duration_ms,
            timestamp: Utc::now(),
        })
        .await;
    }
}
