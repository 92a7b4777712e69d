//! Synthetic tool used to obtain schema-shaped output from a model
//!
//! The model is forced to "call" this tool; its arguments are the
//! structured result.

use async_trait::async_trait;
use serde_json::Value;

use super::result::ToolOutput;
use super::tool::{Tool, missing_required};
use crate::error::{Result, TollgateError};
use crate::llm::ModelResponse;

/// Reserved tool name for structured output
pub const STRUCTURED_OUTPUT_TOOL: &str = "__structured_output__";

/// Corrective instruction sent when the model answers in free text
pub const STRUCTURED_OUTPUT_RETRY_PROMPT: &str =
    "You must format the previous response as structured output.";

/// Tool whose arguments must satisfy a JSON schema
#[derive(Debug, Clone)]
pub struct StructuredOutputTool {
    schema: Value,
}

impl StructuredOutputTool {
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }

    /// Check `args` against the schema's required fields
    pub fn validate_output(&self, args: &Value) -> Result<Value> {
        if !args.is_object() {
            return Err(TollgateError::StructuredOutput(
                "structured output must be a JSON object".into(),
            ));
        }
        let missing = missing_required(&self.schema, args);
        if !missing.is_empty() {
            return Err(TollgateError::StructuredOutput(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }
        Ok(args.clone())
    }

    /// Validated arguments of the first structured-output call in `response`
    pub fn extract(&self, response: &ModelResponse) -> Result<Option<Value>> {
        response
            .tool_calls
            .iter()
            .find(|call| call.name == STRUCTURED_OUTPUT_TOOL)
            .map(|call| self.validate_output(&call.arguments))
            .transpose()
    }
}

#[async_trait]
impl Tool for StructuredOutputTool {
    fn name(&self) -> &str {
        STRUCTURED_OUTPUT_TOOL
    }

    fn description(&self) -> Option<&str> {
        Some("Return the final answer as structured output matching the schema.")
    }

    fn schema(&self) -> Option<&Value> {
        Some(&self.schema)
    }

    // Required fields are reported as structured-output errors by invoke
    fn validate(&self, _args: &Value) -> Result<()> {
        Ok(())
    }

    async fn invoke(&self, args: Value) -> Result<ToolOutput> {
        self.validate_output(&args).map(ToolOutput::Structured)
    }
}
