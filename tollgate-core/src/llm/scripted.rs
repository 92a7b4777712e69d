//! Scripted model provider for tests and demos
//!
//! Replies are served in order. An optional repeat reply answers once the
//! script runs out; without one, an exhausted script is a provider error.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    ModelInfo, ModelProvider, ModelRequest, ModelResponse, ModelStream, StreamChunk, ToolCall,
    response_chunks,
};
use crate::error::{Result, TollgateError};

enum Scripted {
    Reply(ModelResponse),
    Streamed(Vec<String>, Vec<ToolCall>),
    Fail(TollgateError),
}

/// Model provider that replays a fixed script
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    repeat: Option<ModelResponse>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    pub fn with_reply(self, response: ModelResponse) -> Self {
        self.push(Scripted::Reply(response));
        self
    }

    /// Queue a plain-text reply
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(ModelResponse::text(text))
    }

    /// Queue a reply requesting a single tool call
    pub fn with_tool_call(self, id: &str, name: &str, arguments: Value) -> Self {
        self.with_reply(ModelResponse::with_tool_calls(vec![ToolCall::new(
            id, name, arguments,
        )]))
    }

    /// Queue a reply that streams as the given text deltas
    pub fn with_stream(self, chunks: &[&str]) -> Self {
        self.push(Scripted::Streamed(
            chunks.iter().map(|c| c.to_string()).collect(),
            Vec::new(),
        ));
        self
    }

    /// Queue a failure
    pub fn with_error(self, error: TollgateError) -> Self {
        self.push(Scripted::Fail(error));
        self
    }

    /// Answer with `response` whenever the script is empty
    pub fn repeating(mut self, response: ModelResponse) -> Self {
        self.repeat = Some(response);
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of model calls received
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn push(&self, item: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
    }

    fn next(&self, request: &ModelRequest) -> Result<Scripted> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let item = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (item, &self.repeat) {
            (Some(item), _) => Ok(item),
            (None, Some(repeat)) => Ok(Scripted::Reply(repeat.clone())),
            (None, None) => Err(TollgateError::Provider("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        match self.next(request)? {
            Scripted::Reply(response) => Ok(response),
            Scripted::Streamed(chunks, tool_calls) => Ok(ModelResponse {
                text: chunks.concat(),
                tool_calls,
                ..Default::default()
            }),
            Scripted::Fail(error) => Err(error),
        }
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ModelStream> {
        let chunks: Vec<StreamChunk> = match self.next(request)? {
            Scripted::Reply(response) => response_chunks(response),
            Scripted::Streamed(chunks, tool_calls) => chunks
                .into_iter()
                .map(StreamChunk::Text)
                .chain(tool_calls.into_iter().map(StreamChunk::ToolCall))
                .collect(),
            Scripted::Fail(error) => return Err(error),
        };
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "script".to_string(),
        }
    }
}
