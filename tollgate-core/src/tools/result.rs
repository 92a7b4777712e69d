//! Tool call outcomes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value returned by a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    /// Plain text
    Text(String),
    /// JSON payload
    Structured(Value),
}

impl ToolOutput {
    /// Text fed back to the model
    pub fn to_text(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Structured(value) => value.to_string(),
        }
    }

    /// Payload kept alongside the text when the result is a JSON object
    pub fn structured(&self) -> Option<&Value> {
        match self {
            ToolOutput::Structured(value) if value.is_object() => Some(value),
            _ => None,
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => ToolOutput::Text(text),
            other => ToolOutput::Structured(other),
        }
    }
}

/// One executed tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub output: ToolOutput,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_structured_only_for_objects() {
        let obj = ToolOutput::from(json!({"hits": 3}));
        assert_eq!(obj.structured(), Some(&json!({"hits": 3})));
        assert_eq!(obj.to_text(), r#"{"hits":3}"#);

        let list = ToolOutput::from(json!([1, 2]));
        assert!(list.structured().is_none());
        assert_eq!(list.to_text(), "[1,2]");

        let text = ToolOutput::from(json!("plain"));
        assert_eq!(text, ToolOutput::Text("plain".into()));
    }
}
