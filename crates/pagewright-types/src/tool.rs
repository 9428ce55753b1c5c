//! Tool-calling types shared by the model client, the tool registry, and the
//! build loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input object.
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id used to correlate the result.
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Successful tool output.
///
/// `content` is fed back to the model; `artifacts` are merged into the
/// session's artifact bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }
}

/// Completed tool invocation, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub result_content: String,
    pub is_error: bool,
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
}

impl ToolInvocation {
    pub fn success(call: &ToolCall, output: ToolOutput) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
            result_content: output.content,
            is_error: false,
            artifacts: output.artifacts,
        }
    }

    pub fn failure(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
            result_content: format!("Error: {error}"),
            is_error: true,
            artifacts: BTreeMap::new(),
        }
    }
}

/// Errors raised by tool execution. Always converted to an error-tagged
/// result for the model, never propagated out of the build loop.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("execution failed: {0}")]
    Execution(String),
}
