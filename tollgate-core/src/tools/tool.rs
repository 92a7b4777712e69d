//! Tool trait and definitions
//!
//! A tool is a named capability with an optional JSON parameter schema.
//! Tools are invoked by the agent loop when the model requests them.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::result::ToolOutput;
use crate::error::{Result, TollgateError};

/// Tool description advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: empty_schema(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Schema for a tool that takes no parameters
pub fn empty_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// Names listed in `schema.required` that are absent from `args`
pub fn missing_required(schema: &Value, args: &Value) -> Vec<String> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Vec::new();
    };
    required
        .iter()
        .filter_map(Value::as_str)
        .filter(|field| args.get(*field).is_none())
        .map(str::to_string)
        .collect()
}

/// Core tool trait
///
/// Implement this trait to create a tool that agents can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, unique within a registry
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> Option<&str> {
        None
    }

    /// JSON schema for the parameters
    fn schema(&self) -> Option<&Value> {
        None
    }

    /// Check arguments before invocation.
    ///
    /// The default rejects calls missing any field the schema marks required.
    fn validate(&self, args: &Value) -> Result<()> {
        let Some(schema) = self.schema() else {
            return Ok(());
        };
        let missing = missing_required(schema, args);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TollgateError::Tool(format!(
                "Missing required arguments for {}: {}",
                self.name(),
                missing.join(", ")
            )))
        }
    }

    /// Run the tool
    async fn invoke(&self, args: Value) -> Result<ToolOutput>;

    /// Definition advertised to the model
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().map(str::to_string),
            input_schema: self.schema().cloned().unwrap_or_else(empty_schema),
        }
    }
}

/// Validate and invoke a tool, wrapping any failure as a tool error
pub async fn call_tool(tool: &dyn Tool, args: Value) -> Result<ToolOutput> {
    tool.validate(&args)?;
    tool.invoke(args).await.map_err(TollgateError::into_tool)
}

type Handler = dyn Fn(Value) -> BoxFuture<'static, Result<ToolOutput>> + Send + Sync;

/// Tool backed by an async closure
///
/// ```rust
/// use serde_json::json;
/// use tollgate_core::tools::FnTool;
///
/// let echo = FnTool::new("echo", |args| async move {
///     Ok(args["text"].as_str().unwrap_or_default().to_string())
/// })
/// .with_description("Echo the text back")
/// .with_schema(json!({
///     "type": "object",
///     "properties": {"text": {"type": "string"}},
///     "required": ["text"]
/// }));
/// ```
pub struct FnTool {
    name: String,
    description: Option<String>,
    schema: Option<Value>,
    handler: Arc<Handler>,
}

impl FnTool {
    pub fn new<F, Fut, T>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Into<ToolOutput> + Send + 'static,
    {
        let handler: Arc<Handler> = Arc::new(move |args| -> BoxFuture<'static, Result<ToolOutput>> {
            let fut = handler(args);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Self {
            name: name.into(),
            description: None,
            schema: None,
            handler,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }

    async fn invoke(&self, args: Value) -> Result<ToolOutput> {
        (self.handler)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greet() -> FnTool {
        FnTool::new("greet", |args: Value| async move {
            Ok(format!("hello {}", args["name"].as_str().unwrap_or("?")))
        })
        .with_schema(json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }))
    }

    #[tokio::test]
    async fn test_call_tool_success() {
        let out = call_tool(&greet(), json!({"name": "ada"})).await.unwrap();
        assert_eq!(out, ToolOutput::Text("hello ada".into()));
    }

    #[tokio::test]
    async fn test_missing_required_stops_before_invoke() {
        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = invoked.clone();
        let tool = FnTool::new("needs_id", move |_args| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok("ran")
            }
        })
        .with_schema(json!({"type": "object", "required": ["id"]}));

        let err = call_tool(&tool, json!({})).await.unwrap_err();
        assert!(matches!(err, TollgateError::Tool(ref m) if m.contains("id")));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_wrapped_with_original_message() {
        let tool = FnTool::new("broken", |_args| async move {
            Err::<String, _>(TollgateError::Other("disk on fire".into()))
        });

        let err = call_tool(&tool, json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool error: disk on fire");
    }

    #[test]
    fn test_definition_defaults_schema() {
        let tool = FnTool::new("noop", |_args| async move { Ok("") });
        let def = tool.definition();
        assert_eq!(def.name, "noop");
        assert!(def.description.is_none());
        assert_eq!(def.input_schema, empty_schema());

        let def = greet().with_description("Say hi").definition();
        assert_eq!(def.description.as_deref(), Some("Say hi"));
        assert_eq!(def.input_schema["required"][0], "name");
    }

    #[test]
    fn test_missing_required() {
        let schema = json!({"required": ["a", "b"]});
        assert_eq!(missing_required(&schema, &json!({"a": 1})), vec!["b"]);
        assert!(missing_required(&json!({}), &json!({})).is_empty());
    }
}
