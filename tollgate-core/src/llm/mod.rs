//! Model provider abstraction
//!
//! A provider turns a conversation plus tool definitions into either text or
//! tool-call requests. Concrete wire formats live outside this crate; they
//! only need to implement [`ModelProvider::complete`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{Result, TollgateError};
use crate::tools::{
    STRUCTURED_OUTPUT_RETRY_PROMPT, STRUCTURED_OUTPUT_TOOL, StructuredOutputTool, Tool,
    ToolDefinition, ToolOutput,
};

pub mod resilient;
pub mod scripted;

pub use resilient::ResilientProvider;
pub use scripted::ScriptedProvider;

/// Helper function to request structured output and deserialize it.
pub async fn generate_structured_output<T: DeserializeOwned>(
    provider: &dyn ModelProvider,
    request: &ModelRequest,
    schema: &Value,
) -> Result<T> {
    let json = provider.structured_output(request, schema).await?;
    serde_json::from_value(json).map_err(|e| {
        TollgateError::StructuredOutput(format!(
            "Failed to deserialize structured output: {}",
            e
        ))
    })
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message body: plain text or a provider-specific JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(Value),
}

impl MessageContent {
    /// Text form of the content
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Structured(value) => value.to_string(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: None,
            structured: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn that requested tools
    pub fn assistant_tool_calls(response: &ModelResponse) -> Self {
        let content = match &response.assistant_content {
            Some(value) => MessageContent::Structured(value.clone()),
            None => MessageContent::Text(response.text.clone()),
        };
        Self {
            role: Role::Assistant,
            content,
            name: None,
            tool_call_id: None,
            structured: None,
            tool_calls: response.tool_calls.clone(),
        }
    }

    /// Tool turn answering `call`
    pub fn tool_result(call: &ToolCall, output: &ToolOutput) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(output.to_text()),
            name: Some(call.name.clone()),
            tool_call_id: Some(call.id.clone()),
            structured: output.structured().cloned(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Text form of the content
    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// A model's request to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// How the model may pick tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    Tool { name: String },
}

impl ToolChoice {
    pub fn tool(name: impl Into<String>) -> Self {
        ToolChoice::Tool { name: name.into() }
    }
}

/// Generation options passed through to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Temperature for generation (0.0-2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// Request to a model provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,

    /// Forced or free tool selection
    pub tool_choice: Option<ToolChoice>,

    pub options: ModelOptions,
}

impl ModelRequest {
    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }
}

/// Response from a model provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text
    #[serde(default)]
    pub text: String,

    /// Tools the model asked for, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Provider-native assistant content to echo back on the next round
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_content: Option<Value>,

    /// Token usage information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Fold one stream chunk into this response.
    ///
    /// Returns the text delta when the chunk carried non-empty text.
    pub fn absorb(&mut self, chunk: StreamChunk) -> Option<String> {
        match chunk {
            StreamChunk::Text(delta) if delta.is_empty() => None,
            StreamChunk::Text(delta) => {
                self.text.push_str(&delta);
                Some(delta)
            }
            StreamChunk::ToolCall(call) => {
                self.tool_calls.push(call);
                None
            }
            StreamChunk::AssistantContent(content) => {
                self.assistant_content = Some(content);
                None
            }
            StreamChunk::Usage(usage) => {
                self.usage.get_or_insert_with(TokenUsage::default).add(&usage);
                None
            }
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Add another round's usage
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Incremental piece of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text delta shown to the caller
    Text(String),
    /// Tool-call intent reported out of band
    ToolCall(ToolCall),
    /// Provider-native assistant content
    AssistantContent(Value),
    Usage(TokenUsage),
}

/// Stream of response chunks
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Split a complete response into the chunks a stream would carry
pub fn response_chunks(response: ModelResponse) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    if !response.text.is_empty() {
        chunks.push(StreamChunk::Text(response.text));
    }
    chunks.extend(response.tool_calls.into_iter().map(StreamChunk::ToolCall));
    if let Some(content) = response.assistant_content {
        chunks.push(StreamChunk::AssistantContent(content));
    }
    if let Some(usage) = response.usage {
        chunks.push(StreamChunk::Usage(usage));
    }
    chunks
}

/// Drain a stream into a response, handing each text delta to `on_text`
pub async fn accumulate_stream(
    mut stream: ModelStream,
    mut on_text: impl FnMut(&str),
) -> Result<ModelResponse> {
    let mut response = ModelResponse::default();
    while let Some(chunk) = stream.next().await {
        if let Some(delta) = response.absorb(chunk?) {
            on_text(&delta);
        }
    }
    Ok(response)
}

/// Trait for model provider implementations.
///
/// Only `complete` is required. `stream` defaults to a single complete call
/// replayed as chunks, and `structured_output` to a forced call of the
/// synthetic structured-output tool.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one model round
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Run one model round as a stream of chunks.
    ///
    /// Tool-call intents travel as [`StreamChunk::ToolCall`].
    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream> {
        let response = self.complete(request).await?;
        let chunks = response_chunks(response);
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }

    /// Obtain an object satisfying `schema`'s required fields.
    ///
    /// Forces the structured-output tool; if the model answers in text
    /// instead, retries once with a corrective instruction.
    async fn structured_output(&self, request: &ModelRequest, schema: &Value) -> Result<Value> {
        let tool = StructuredOutputTool::new(schema.clone());
        let mut request = request.clone();
        request.tools.push(tool.definition());
        request.tool_choice = Some(ToolChoice::tool(STRUCTURED_OUTPUT_TOOL));

        let response = self.complete(&request).await?;
        if let Some(value) = tool.extract(&response)? {
            return Ok(value);
        }

        if !response.text.is_empty() {
            request.messages.push(Message::assistant(response.text));
        }
        request
            .messages
            .push(Message::user(STRUCTURED_OUTPUT_RETRY_PROMPT));

        let response = self.complete(&request).await?;
        tool.extract(&response)?.ok_or_else(|| {
            TollgateError::StructuredOutput("Model did not return structured output".to_string())
        })
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_model_options() {
        let options = ModelOptions::new().with_temperature(5.0).with_max_tokens(1000);
        assert_eq!(options.temperature, Some(2.0));
        assert_eq!(options.max_tokens, Some(1000));

        let options = ModelOptions::new().with_temperature(-1.0);
        assert_eq!(options.temperature, Some(0.0));
    }

    #[test]
    fn test_message_serde_shape() {
        let call = ToolCall::new("c1", "lookup", json!({"q": "rust"}));
        let msg = Message::tool_result(&call, &ToolOutput::Structured(json!({"hits": 2})));

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["content"], r#"{"hits":2}"#);
        assert_eq!(value["tool_call_id"], "c1");
        assert_eq!(value["structured"], json!({"hits": 2}));

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_assistant_content_preferred() {
        let mut response =
            ModelResponse::with_tool_calls(vec![ToolCall::new("c1", "lookup", json!({}))]);
        response.assistant_content = Some(json!([{"type": "tool_use", "id": "c1"}]));

        let msg = Message::assistant_tool_calls(&response);
        assert!(matches!(msg.content, MessageContent::Structured(_)));
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_accumulate_stream() {
        let chunks = vec![
            Ok(StreamChunk::Text("Hel".into())),
            Ok(StreamChunk::Text("lo".into())),
            Ok(StreamChunk::Usage(TokenUsage::new(3, 2))),
        ];
        let stream: ModelStream = Box::pin(futures::stream::iter(chunks));

        let mut seen = Vec::new();
        let response = accumulate_stream(stream, |delta| seen.push(delta.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(response.text, "Hello");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn test_structured_output_retries_once() {
        let provider = ScriptedProvider::new()
            .with_reply(ModelResponse::text("Ada is 36"))
            .with_reply(ModelResponse::with_tool_calls(vec![ToolCall::new(
                "c1",
                STRUCTURED_OUTPUT_TOOL,
                json!({"name": "Ada", "age": 36}),
            )]));
        let schema = json!({"type": "object", "required": ["name", "age"]});

        let value = provider
            .structured_output(&ModelRequest::from_prompt("who?"), &schema)
            .await
            .unwrap();
        assert_eq!(value["age"], 36);

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].tool_choice,
            Some(ToolChoice::tool(STRUCTURED_OUTPUT_TOOL))
        );
        let retry = &requests[1].messages;
        assert_eq!(retry.last().unwrap().text(), STRUCTURED_OUTPUT_RETRY_PROMPT);
        assert_eq!(retry[retry.len() - 2].text(), "Ada is 36");
    }

    #[tokio::test]
    async fn test_structured_output_gives_up() {
        let provider = ScriptedProvider::new()
            .with_reply(ModelResponse::text("no"))
            .with_reply(ModelResponse::text("still no"));

        let err = provider
            .structured_output(&ModelRequest::from_prompt("x"), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TollgateError::StructuredOutput(_)));
    }

    #[tokio::test]
    async fn test_generate_structured_output_typed() {
        #[derive(Deserialize)]
        struct Person {
            name: String,
        }

        let provider = ScriptedProvider::new().with_reply(ModelResponse::with_tool_calls(vec![
            ToolCall::new("c1", STRUCTURED_OUTPUT_TOOL, json!({"name": "Ada"})),
        ]));
        let person: Person = generate_structured_output(
            &provider,
            &ModelRequest::from_prompt("who?"),
            &json!({"required": ["name"]}),
        )
        .await
        .unwrap();
        assert_eq!(person.name, "Ada");
    }
}
