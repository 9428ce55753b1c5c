//! Anthropic Messages API types.
//!
//! These are Anthropic-specific request/response structures used for HTTP
//! communication with the Anthropic Messages API. They are NOT the generic
//! LLM types from pagewright-types -- those are provider-agnostic.

use serde::{Deserialize, Serialize};

use pagewright_types::llm::{ContentBlock, StopReason, Usage};
use pagewright_types::tool::ToolDefinition;

/// Request body for the Anthropic Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
}

/// A single message in an Anthropic conversation.
///
/// `ContentBlock` already serializes in the Messages API block shape.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

/// A tool advertised in the request.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl From<&ToolDefinition> for AnthropicTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            input_schema: def.input_schema.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SSE event payload structs
//
// The Anthropic SSE stream uses the `event:` field to name the event type
// (e.g., "message_start", "content_block_delta") and the `data:` field
// contains JSON. Each payload is deserialized into a specific struct based
// on the event type string.
// ---------------------------------------------------------------------------

/// Payload for `event: message_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartPayload {
    pub message: AnthropicMessageObj,
}

/// The message object inside a `message_start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageObj {
    pub id: String,
    pub model: String,
    pub usage: Option<AnthropicUsage>,
}

/// Payload for `event: content_block_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStartPayload {
    pub index: u32,
    pub content_block: AnthropicContentBlock,
}

/// A content block in an Anthropic response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

impl AnthropicContentBlock {
    pub fn type_name(&self) -> &str {
        match self {
            AnthropicContentBlock::Text { .. } => "text",
            AnthropicContentBlock::ToolUse { .. } => "tool_use",
            AnthropicContentBlock::Thinking { .. } => "thinking",
            AnthropicContentBlock::Other => "other",
        }
    }
}

/// Payload for `event: content_block_delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaPayload {
    pub index: u32,
    pub delta: AnthropicDelta,
}

/// Delta types within a content block.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta { signature: String },
}

/// Payload for `event: content_block_stop`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStopPayload {
    pub index: u32,
}

/// Payload for `event: message_delta`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaPayload {
    pub delta: MessageDeltaObj,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

/// The delta object inside a `message_delta` event.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaObj {
    pub stop_reason: Option<String>,
}

/// Token usage from Anthropic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    pub cache_creation_input_tokens: Option<u32>,
    pub cache_read_input_tokens: Option<u32>,
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_input_tokens: usage.cache_creation_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
        }
    }
}

/// Payload for `event: error`, also the body of non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub error: AnthropicError,
}

/// An error from the Anthropic API.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Non-streaming response from the Anthropic Messages API.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicNonStreamResponse {
    pub id: String,
    pub content: Vec<AnthropicContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: AnthropicUsage,
}

/// Map the API's `stop_reason` string. Unknown or missing values end the turn.
pub fn parse_stop_reason(raw: Option<&str>) -> StopReason {
    raw.and_then(|s| s.parse().ok()).unwrap_or(StopReason::EndTurn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = AnthropicRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: vec![ContentBlock::Text {
                    text: "Hello".to_string(),
                }],
            }],
            system: Some("You are helpful.".to_string()),
            stream: false,
            temperature: Some(0.7),
            stop_sequences: None,
            tools: Vec::new(),
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert!(json.get("stop_sequences").is_none());
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_tool_result_blocks_serialize_in_wire_shape() {
        let msg = AnthropicMessage {
            role: "user".to_string(),
            content: vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: "Error: missing headline".into(),
                is_error: true,
            }],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(json["content"][0]["is_error"], true);
    }

    #[test]
    fn test_tool_from_definition() {
        let def = ToolDefinition {
            name: "save_brief".into(),
            description: "Save the brief".into(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let tool = AnthropicTool::from(&def);
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["name"], "save_brief");
        assert_eq!(json["input_schema"]["type"], "object");
    }

    #[test]
    fn test_content_block_tool_use_deserialization() {
        let json = r#"{"type": "tool_use", "id": "tool_1", "name": "save_brief", "input": {"x": 1}}"#;
        let block: AnthropicContentBlock = serde_json::from_str(json).unwrap();
        match block {
            AnthropicContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "tool_1");
                assert_eq!(name, "save_brief");
                assert_eq!(input["x"], 1);
            }
            _ => panic!("expected ToolUse variant"),
        }
    }

    #[test]
    fn test_unknown_content_block_is_tolerated() {
        let json = r#"{"type": "server_tool_use", "id": "x"}"#;
        let block: AnthropicContentBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.type_name(), "other");
    }

    #[test]
    fn test_message_start_payload_deserialization() {
        let json = r#"{
            "type": "message_start",
            "message": {
                "id": "msg_123",
                "model": "claude-sonnet-4-20250514",
                "usage": {"input_tokens": 100, "output_tokens": 0}
            }
        }"#;
        let payload: MessageStartPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.message.id, "msg_123");
        assert_eq!(payload.message.usage.as_ref().unwrap().input_tokens, 100);
    }

    #[test]
    fn test_parse_stop_reason() {
        assert_eq!(parse_stop_reason(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(parse_stop_reason(Some("refusal")), StopReason::EndTurn);
        assert_eq!(parse_stop_reason(None), StopReason::EndTurn);
    }
}
