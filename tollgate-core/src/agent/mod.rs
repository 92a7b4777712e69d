//! Tool-calling agent
//!
//! An [`Agent`] drives a bounded number of model rounds per invocation.
//! Between rounds it executes the tools the model asked for, each behind the
//! shared gates. An invocation ends in exactly one of:
//!
//! - a plain answer (`end_turn`)
//! - a captured structured output (`structured_output`)
//! - a pending interrupt (`interrupted`), checked once on entry
//! - an error, including the iteration cap
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate_core::prelude::*;
//!
//! # async fn run(provider: Arc<dyn ModelProvider>) -> Result<()> {
//! let agent = Agent::builder()
//!     .name("assistant")
//!     .provider(provider)
//!     .tool(Arc::new(FnTool::new("echo", |args| async move { Ok(args) })))
//!     .build()
//!     .await?;
//!
//! let answer = agent.call("Say hello through the echo tool").await?;
//! # Ok(())
//! # }
//! ```

mod emitter;
mod result;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

pub use result::{AgentResult, CallOptions, Interrupt};

use emitter::InvocationEmitter;

use crate::error::{Result, TollgateError};
use crate::events::{AgentEvent, EventSender, EventSink, StopReason, event_channel};
use crate::gate::Gates;
use crate::hooks::HookRegistry;
use crate::llm::{Message, ModelProvider, ModelRequest, ModelResponse, TokenUsage, ToolChoice};
use crate::memory::{MemoryStrategy, RollingWindow};
use crate::runtime::RuntimeContext;
use crate::safety::{SafetyFilter, enforce_all};
use crate::session::MessageStore;
use crate::tools::{
    STRUCTURED_OUTPUT_TOOL, StructuredOutputTool, Tool, ToolRegistry, ToolResult, ToolRuntime,
};

/// Callback receiving streamed text deltas.
///
/// The borrow and the callback's own lifetime are separate so each model
/// round can reborrow it.
type ChunkCallback<'a, 'f> = &'a mut (dyn FnMut(&str) + Send + 'f);

/// Tool-calling agent with optional conversation memory
pub struct Agent {
    name: String,
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    runtime: ToolRuntime,
    gates: Arc<Gates>,
    hooks: Arc<HookRegistry>,
    memory: bool,
    strategy: Arc<dyn MemoryStrategy>,
    safety_filters: Vec<Arc<dyn SafetyFilter>>,
    store: Option<Arc<dyn MessageStore>>,
    session_id: Option<String>,
    structured_schema: Option<Value>,
    max_iterations: usize,
    tool_timeout: Option<Duration>,
    event_buffer: usize,
    messages: Mutex<Vec<Message>>,
    interrupt: Mutex<Option<Interrupt>>,
    last_usage: Mutex<Option<TokenUsage>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Agent {
    /// Create a new agent builder
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools this agent can call
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Remembered conversation
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    /// Usage reported by the most recent model round
    pub fn last_usage(&self) -> Option<TokenUsage> {
        *lock(&self.last_usage)
    }

    /// Forget the conversation, persisting the empty history if a store is set
    pub async fn reset_messages(&self) -> Result<()> {
        lock(&self.messages).clear();
        self.persist().await
    }

    /// Make the next call return immediately with stop reason `interrupted`
    pub fn interrupt(&self, reason: impl Into<String>, message: Option<String>) {
        *lock(&self.interrupt) = Some(Interrupt::new(reason, message));
    }

    /// Run a prompt and return the answer text
    pub async fn call(&self, prompt: &str) -> Result<String> {
        Ok(self.call_with(prompt, CallOptions::default()).await?.text)
    }

    /// Run a prompt and return the full result
    pub async fn call_with(&self, prompt: &str, options: CallOptions) -> Result<AgentResult> {
        self.invoke(prompt, &options, EventSink::none(), None, false)
            .await
    }

    /// Run a prompt, handing each text delta to `on_chunk` as it arrives
    pub async fn stream<F>(
        &self,
        prompt: &str,
        options: CallOptions,
        mut on_chunk: F,
    ) -> Result<AgentResult>
    where
        F: FnMut(&str) + Send,
    {
        self.invoke(prompt, &options, EventSink::none(), Some(&mut on_chunk), false)
            .await
    }

    /// Run a prompt and return an object satisfying `schema`.
    ///
    /// Falls back to the schema configured on the builder.
    pub async fn structured_output(&self, prompt: &str, schema: Option<Value>) -> Result<Value> {
        let schema = schema
            .or_else(|| self.structured_schema.clone())
            .ok_or_else(|| {
                TollgateError::Configuration("No structured output schema provided".to_string())
            })?;
        let result = self
            .call_with(prompt, CallOptions::new().with_schema(schema))
            .await?;
        result.structured_output.ok_or_else(|| {
            TollgateError::StructuredOutput("Model did not return structured output".to_string())
        })
    }

    /// Run a prompt, sending its events to `sender` as they happen.
    ///
    /// Safety violations end the call with stop reason
    /// `guardrail_intervened` instead of an error.
    pub async fn call_with_events(
        &self,
        prompt: &str,
        options: CallOptions,
        sender: EventSender,
    ) -> Result<AgentResult> {
        self.invoke(prompt, &options, EventSink::new(sender), None, true)
            .await
    }

    /// Run a prompt and collect the events it produced, in order
    pub async fn run_events(
        &self,
        prompt: &str,
        options: CallOptions,
    ) -> (Vec<AgentEvent>, Result<AgentResult>) {
        let (tx, mut rx) = event_channel(self.event_buffer);
        let run = self.call_with_events(prompt, options, tx);
        let drain = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        let (result, events) = tokio::join!(run, drain);
        (events, result)
    }

    async fn invoke(
        &self,
        prompt: &str,
        options: &CallOptions,
        sink: EventSink,
        on_chunk: Option<ChunkCallback<'_, '_>>,
        guardrails: bool,
    ) -> Result<AgentResult> {
        let emitter = InvocationEmitter::new(&self.hooks, sink);
        debug!(
            agent = %self.name,
            invocation_id = emitter.invocation_id(),
            "Invocation started"
        );
        let started = Instant::now();
        emitter.started(&self.name, prompt).await;

        let outcome = match self.run_loop(prompt, options, &emitter, on_chunk).await {
            Err(TollgateError::Safety(violation)) if guardrails => {
                emitter
                    .interrupted(StopReason::GuardrailIntervened.as_str(), Some(&violation))
                    .await;
                Ok(AgentResult::interrupted(
                    StopReason::GuardrailIntervened,
                    Interrupt::new(StopReason::GuardrailIntervened.as_str(), Some(violation)),
                ))
            }
            other => other,
        };

        let elapsed = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => emitter.completed(Some(result.stop_reason), None, elapsed).await,
            Err(e) => emitter.completed(None, Some(e.to_string()), elapsed).await,
        }
        outcome
    }

    async fn run_loop(
        &self,
        prompt: &str,
        options: &CallOptions,
        emitter: &InvocationEmitter<'_>,
        mut on_chunk: Option<ChunkCallback<'_, '_>>,
    ) -> Result<AgentResult> {
        let pending = lock(&self.interrupt).take();
        if let Some(interrupt) = pending {
            debug!(agent = %self.name, reason = %interrupt.reason, "Consuming interrupt");
            emitter
                .interrupted(&interrupt.reason, interrupt.message.as_deref())
                .await;
            return Ok(AgentResult::interrupted(StopReason::Interrupted, interrupt));
        }

        enforce_all(&self.safety_filters, prompt)?;

        let mut messages = if self.memory {
            self.messages()
        } else {
            Vec::new()
        };
        let user = Message::user(prompt);
        emitter.message_added(&user).await;
        messages.push(user);

        let structured_tool = options
            .structured_schema
            .clone()
            .or_else(|| self.structured_schema.clone())
            .map(StructuredOutputTool::new);
        let mut tools = self.registry.definitions();
        let mut tool_choice = None;
        if let Some(tool) = &structured_tool {
            tools.push(tool.definition());
            tool_choice = Some(ToolChoice::tool(STRUCTURED_OUTPUT_TOOL));
        }

        let max_iterations = options.max_iterations.unwrap_or(self.max_iterations);
        let tool_timeout = options.tool_timeout.or(self.tool_timeout);
        let provider_name = self.provider.model_info().provider;
        let mut result = AgentResult::new(StopReason::EndTurn);

        for iteration in 1..=max_iterations {
            emitter
                .before_model_call(iteration, messages.len(), tools.len())
                .await;
            let request = ModelRequest {
                messages: messages.clone(),
                tools: tools.clone(),
                tool_choice: tool_choice.clone(),
                options: options.model_options.clone(),
            };

            let response = {
                let _permit = self.gates.enter_model_call(&provider_name).await;
                let round_chunk = on_chunk
                    .as_mut()
                    .map(|f| &mut **f as &mut (dyn FnMut(&str) + Send));
                self.model_round(&request, emitter, round_chunk).await
            };
            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let e = e.into_provider();
                    emitter.after_model_call(iteration, Err(e.to_string())).await;
                    return Err(e);
                }
            };
            emitter.after_model_call(iteration, Ok(&response)).await;
            if let Some(usage) = &response.usage {
                result.usage.add(usage);
            }
            *lock(&self.last_usage) = response.usage;

            if !response.has_tool_calls() {
                enforce_all(&self.safety_filters, &response.text)?;
                let assistant = Message::assistant(response.text.clone());
                emitter.message_added(&assistant).await;
                messages.push(assistant.clone());
                self.commit(messages).await?;

                result.text = response.text;
                result.message = Some(assistant);
                return Ok(result);
            }

            debug!(
                agent = %self.name,
                iteration,
                tool_calls = response.tool_calls.len(),
                "Tool calls requested"
            );
            let assistant = Message::assistant_tool_calls(&response);
            emitter.message_added(&assistant).await;
            messages.push(assistant);

            let mut structured = None;
            for call in &response.tool_calls {
                result.tool_uses.push(call.clone());

                if call.name == STRUCTURED_OUTPUT_TOOL
                    && let Some(tool) = &structured_tool
                {
                    let value = tool.validate_output(&call.arguments)?;
                    emitter.structured_output(&value).await;
                    structured = Some(value);
                    continue;
                }

                let tool = self.registry.require(&call.name)?;
                emitter.before_tool_call(call).await;
                let started = Instant::now();
                let outcome = self
                    .runtime
                    .execute(tool.as_ref(), call.arguments.clone(), tool_timeout)
                    .await;
                let elapsed = started.elapsed().as_millis() as u64;
                emitter
                    .after_tool_call(call, elapsed, outcome.as_ref().err().map(|e| e.to_string()))
                    .await;
                let output = outcome?;

                let tool_message = Message::tool_result(call, &output);
                emitter.message_added(&tool_message).await;
                messages.push(tool_message);
                result.tool_results.push(ToolResult {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    output,
                });
            }

            if let Some(value) = structured {
                result.text = value.to_string();
                result.structured_output = Some(value);
                result.stop_reason = StopReason::StructuredOutput;
                return Ok(result);
            }
        }

        Err(TollgateError::Tool(
            "Tool loop exceeded max iterations".to_string(),
        ))
    }

    /// One model round.
    ///
    /// Streaming calls go through `stream`. Their deltas are held until the
    /// round ends and reach the caller only when it requested no tools, so
    /// the streamed text always equals the final answer. Other calls use
    /// `complete`.
    async fn model_round(
        &self,
        request: &ModelRequest,
        emitter: &InvocationEmitter<'_>,
        on_chunk: Option<ChunkCallback<'_, '_>>,
    ) -> Result<ModelResponse> {
        let Some(on_chunk) = on_chunk else {
            return self.provider.complete(request).await;
        };

        let mut stream = self.provider.stream(request).await?;
        let mut response = ModelResponse::default();
        let mut deltas = Vec::new();
        while let Some(chunk) = stream.next().await {
            if let Some(delta) = response.absorb(chunk?) {
                deltas.push(delta);
            }
        }

        if response.has_tool_calls() {
            debug!(
                agent = %self.name,
                held = deltas.len(),
                "Discarding text deltas of a tool round"
            );
            return Ok(response);
        }
        for delta in &deltas {
            on_chunk(delta);
            emitter.text_delta(delta).await;
        }
        Ok(response)
    }

    /// Remember the finished conversation and persist it
    async fn commit(&self, messages: Vec<Message>) -> Result<()> {
        if self.memory {
            let kept = self.strategy.apply(messages).await?;
            *lock(&self.messages) = kept;
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<()> {
        if let (Some(store), Some(session_id)) = (&self.store, &self.session_id) {
            let snapshot = self.messages();
            store.save(session_id, &snapshot).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("provider", &self.provider.model_info())
            .field("tools", &self.registry.names())
            .field("memory", &self.memory)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    name: Option<String>,
    provider: Option<Arc<dyn ModelProvider>>,
    context: Option<Arc<RuntimeContext>>,
    registry: Option<Arc<ToolRegistry>>,
    tools: Vec<Arc<dyn Tool>>,
    history: Vec<Message>,
    memory: Option<bool>,
    strategy: Option<Arc<dyn MemoryStrategy>>,
    safety_filters: Vec<Arc<dyn SafetyFilter>>,
    store: Option<Arc<dyn MessageStore>>,
    session_id: Option<String>,
    structured_schema: Option<Value>,
    max_iterations: Option<usize>,
    tool_timeout: Option<Duration>,
}

impl AgentBuilder {
    /// Create a new agent builder
    pub fn new() -> Self {
        Self {
            name: None,
            provider: None,
            context: None,
            registry: None,
            tools: Vec::new(),
            history: Vec::new(),
            memory: None,
            strategy: None,
            safety_filters: Vec::new(),
            store: None,
            session_id: None,
            structured_schema: None,
            max_iterations: None,
            tool_timeout: None,
        }
    }

    /// Name used in events and logs
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Model provider; defaults to the context's provider
    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Shared gates, hooks, configuration and default provider
    pub fn context(mut self, context: Arc<RuntimeContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Share an existing registry instead of creating one
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a tool to this agent
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add multiple tools at once
    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Starting conversation; replaced by the store's copy when one exists
    pub fn history(mut self, messages: Vec<Message>) -> Self {
        self.history = messages;
        self
    }

    /// Carry the conversation between calls
    pub fn memory(mut self, enabled: bool) -> Self {
        self.memory = Some(enabled);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn MemoryStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn safety_filter(mut self, filter: Arc<dyn SafetyFilter>) -> Self {
        self.safety_filters.push(filter);
        self
    }

    /// Load the conversation from `store` on build and save it after each turn
    pub fn store(mut self, store: Arc<dyn MessageStore>, session_id: impl Into<String>) -> Self {
        self.store = Some(store);
        self.session_id = Some(session_id.into());
        self
    }

    /// Request structured output on every call
    pub fn structured_schema(mut self, schema: Value) -> Self {
        self.structured_schema = Some(schema);
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Build the agent
    pub async fn build(self) -> Result<Agent> {
        let context = self
            .context
            .unwrap_or_else(|| Arc::new(RuntimeContext::new()));
        let settings = &context.config().agent;

        let provider = self
            .provider
            .or_else(|| context.default_provider())
            .ok_or_else(|| TollgateError::Configuration("No provider configured".to_string()))?;

        let max_iterations = self.max_iterations.unwrap_or(settings.max_iterations);
        if max_iterations == 0 {
            return Err(TollgateError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let registry = self.registry.unwrap_or_default();
        registry.register_all(self.tools)?;

        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(RollingWindow::new(settings.window)));

        let mut messages = self.history;
        if let (Some(store), Some(session_id)) = (&self.store, &self.session_id) {
            let saved = store.load(session_id).await?;
            if !saved.is_empty() {
                messages = saved;
            }
        }

        let name = self.name.unwrap_or_else(|| "agent".to_string());
        debug!(agent = %name, tools = registry.len(), "Agent built");

        Ok(Agent {
            name,
            provider,
            runtime: ToolRuntime::new(context.gates().clone(), context.tool_runtime_config()),
            gates: context.gates().clone(),
            hooks: context.hooks().clone(),
            registry,
            memory: self.memory.unwrap_or(settings.memory),
            strategy,
            safety_filters: self.safety_filters,
            store: self.store,
            session_id: self.session_id,
            structured_schema: self.structured_schema,
            max_iterations,
            tool_timeout: self.tool_timeout,
            event_buffer: context.config().events.buffer_size,
            messages: Mutex::new(messages),
            interrupt: Mutex::new(None),
            last_usage: Mutex::new(None),
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
