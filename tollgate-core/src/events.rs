//! Agent event types and per-invocation event channels
//!
//! Every phase transition of an agent invocation is described by an
//! [`AgentEvent`]. Events go to the shared [`HookRegistry`](crate::hooks::HookRegistry)
//! and, when the caller asked for one, to a bounded channel created for that
//! invocation only.
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_core::events::event_channel;
//!
//! let (tx, mut rx) = event_channel(64);
//! let drain = async move {
//!     let mut seen = Vec::new();
//!     while let Some(event) = rx.recv().await {
//!         seen.push(event);
//!     }
//!     seen
//! };
//! let (result, events) = tokio::join!(agent.call_with_events("hi", opts, tx), drain);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::llm::{Message, TokenUsage, ToolCall};

/// Why an invocation reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    StructuredOutput,
    Interrupted,
    GuardrailIntervened,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::StructuredOutput => "structured_output",
            StopReason::Interrupted => "interrupted",
            StopReason::GuardrailIntervened => "guardrail_intervened",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted during an agent invocation.
///
/// For a single invocation, events arrive in emission order on every sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Emitted once when an invocation begins
    InvocationStarted {
        invocation_id: String,
        agent_name: String,
        prompt: String,
        timestamp: DateTime<Utc>,
    },

    /// Emitted when a message is appended to the working conversation
    MessageAdded {
        invocation_id: String,
        message: Message,
        timestamp: DateTime<Utc>,
    },

    /// Emitted before each model round
    BeforeModelCall {
        invocation_id: String,
        /// 1-based round number
        iteration: usize,
        message_count: usize,
        tool_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Emitted after each model round
    AfterModelCall {
        invocation_id: String,
        iteration: usize,
        /// Number of tool calls the model requested
        tool_calls: usize,
        usage: Option<TokenUsage>,
        /// Error message if the round failed
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Emitted before a tool is executed
    BeforeToolCall {
        invocation_id: String,
        tool_call: ToolCall,
        timestamp: DateTime<Utc>,
    },

    /// Emitted after a tool finishes, fails, or times out
    AfterToolCall {
        invocation_id: String,
        tool_call_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        /// Error message if failed (output is carried by the tool message)
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Streamed text delta
    TextDelta {
        invocation_id: String,
        delta: String,
        timestamp: DateTime<Utc>,
    },

    /// Structured output captured from the synthetic tool
    StructuredOutput {
        invocation_id: String,
        value: Value,
        timestamp: DateTime<Utc>,
    },

    /// The invocation ended early because of an interrupt or guardrail
    Interrupted {
        invocation_id: String,
        reason: String,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Emitted once when an invocation ends, successfully or not
    InvocationCompleted {
        invocation_id: String,
        stop_reason: Option<StopReason>,
        error: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Discriminant of [`AgentEvent`], used to key listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InvocationStarted,
    MessageAdded,
    BeforeModelCall,
    AfterModelCall,
    BeforeToolCall,
    AfterToolCall,
    TextDelta,
    StructuredOutput,
    Interrupted,
    InvocationCompleted,
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::InvocationStarted { .. } => EventKind::InvocationStarted,
            AgentEvent::MessageAdded { .. } => EventKind::MessageAdded,
            AgentEvent::BeforeModelCall { .. } => EventKind::BeforeModelCall,
            AgentEvent::AfterModelCall { .. } => EventKind::AfterModelCall,
            AgentEvent::BeforeToolCall { .. } => EventKind::BeforeToolCall,
            AgentEvent::AfterToolCall { .. } => EventKind::AfterToolCall,
            AgentEvent::TextDelta { .. } => EventKind::TextDelta,
            AgentEvent::StructuredOutput { .. } => EventKind::StructuredOutput,
            AgentEvent::Interrupted { .. } => EventKind::Interrupted,
            AgentEvent::InvocationCompleted { .. } => EventKind::InvocationCompleted,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self.kind() {
            EventKind::InvocationStarted => "invocation_started",
            EventKind::MessageAdded => "message_added",
            EventKind::BeforeModelCall => "before_model_call",
            EventKind::AfterModelCall => "after_model_call",
            EventKind::BeforeToolCall => "before_tool_call",
            EventKind::AfterToolCall => "after_tool_call",
            EventKind::TextDelta => "text_delta",
            EventKind::StructuredOutput => "structured_output",
            EventKind::Interrupted => "interrupted",
            EventKind::InvocationCompleted => "invocation_completed",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AgentEvent::InvocationStarted { timestamp, .. }
            | AgentEvent::MessageAdded { timestamp, .. }
            | AgentEvent::BeforeModelCall { timestamp, .. }
            | AgentEvent::AfterModelCall { timestamp, .. }
            | AgentEvent::BeforeToolCall { timestamp, .. }
            | AgentEvent::AfterToolCall { timestamp, .. }
            | AgentEvent::TextDelta { timestamp, .. }
            | AgentEvent::StructuredOutput { timestamp, .. }
            | AgentEvent::Interrupted { timestamp, .. }
            | AgentEvent::InvocationCompleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn invocation_id(&self) -> &str {
        match self {
            AgentEvent::InvocationStarted { invocation_id, .. }
            | AgentEvent::MessageAdded { invocation_id, .. }
            | AgentEvent::BeforeModelCall { invocation_id, .. }
            | AgentEvent::AfterModelCall { invocation_id, .. }
            | AgentEvent::BeforeToolCall { invocation_id, .. }
            | AgentEvent::AfterToolCall { invocation_id, .. }
            | AgentEvent::TextDelta { invocation_id, .. }
            | AgentEvent::StructuredOutput { invocation_id, .. }
            | AgentEvent::Interrupted { invocation_id, .. }
            | AgentEvent::InvocationCompleted { invocation_id, .. } => invocation_id,
        }
    }
}

/// Sender half of an event channel
pub type EventSender = mpsc::Sender<AgentEvent>;

/// Receiver half of an event channel
pub type EventReceiver = mpsc::Receiver<AgentEvent>;

/// Creates a bounded event channel for one invocation.
///
/// The channel is lossy: when the buffer stays full after the invocation
/// yields a few times, the event is dropped with a warning rather than
/// stalling the agent loop.
pub fn event_channel(buffer_size: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(buffer_size.max(1))
}

/// Times a send yields to a lagging receiver before dropping the event
const FULL_CHANNEL_YIELDS: usize = 3;

/// Optional per-invocation destination for events.
///
/// Sending never fails and never blocks: a dropped receiver only means
/// nobody is listening, and a receiver that falls behind loses events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<EventSender>,
}

impl EventSink {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Sink that discards everything
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub async fn send(&self, mut event: AgentEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        for _ in 0..FULL_CHANNEL_YIELDS {
            event = match sender.try_send(event) {
                Ok(()) | Err(TrySendError::Closed(_)) => return,
                Err(TrySendError::Full(event)) => event,
            };
            // Let a drain running on the same task catch up
            tokio::task::yield_now().await;
        }
        if let Err(TrySendError::Full(event)) = sender.try_send(event) {
            warn!(
                invocation_id = event.invocation_id(),
                kind = ?event.kind(),
                "Event channel full, dropping event"
            );
        }
    }
}
