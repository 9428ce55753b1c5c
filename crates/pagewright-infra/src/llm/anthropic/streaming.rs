//! SSE stream creation and state machine for Anthropic Messages API.
//!
//! Implements the streaming protocol described in the Anthropic docs:
//! 1. `message_start` -- Message object with initial usage
//! 2. Per block: `content_block_start` -> N x `content_block_delta` -> `content_block_stop`
//! 3. `message_delta` -- stop_reason and cumulative usage
//! 4. `message_stop` -- final event
//! 5. `ping` events may appear anywhere (keepalive)
//! 6. `error` events may appear mid-stream
//!
//! Tool use input arrives as partial JSON fragments via `input_json_delta`.
//! These are accumulated per content block index and parsed only after
//! `content_block_stop`.

use std::collections::HashMap;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use reqwest_eventsource::{Event, EventSource};
use secrecy::{ExposeSecret, SecretString};

use pagewright_types::llm::{LlmError, StreamEvent};

use super::types::{
    AnthropicContentBlock, AnthropicDelta, AnthropicRequest, ContentBlockDeltaPayload,
    ContentBlockStartPayload, ContentBlockStopPayload, ErrorPayload, MessageDeltaPayload,
    MessageStartPayload, parse_stop_reason,
};

pub(crate) const API_VERSION: &str = "2023-06-01";

/// Accumulates partial JSON fragments for tool use input within a content block.
struct ToolUseAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

/// Internal state for the SSE state machine.
#[derive(Default)]
pub(crate) struct StreamState {
    tool_input_buffers: HashMap<u32, ToolUseAccumulator>,
    message_id: Option<String>,
}

/// Map an Anthropic error type string to an [`LlmError`].
fn error_from_type(error_type: &str, message: String) -> LlmError {
    match error_type {
        "overloaded_error" => LlmError::Overloaded(message),
        "rate_limit_error" => LlmError::RateLimited {
            retry_after_ms: None,
        },
        "authentication_error" | "permission_error" => LlmError::AuthenticationFailed,
        "invalid_request_error" => LlmError::InvalidRequest(message),
        _ => LlmError::Provider { message },
    }
}

/// Map a non-2xx HTTP response to an [`LlmError`].
pub(crate) fn status_error(status: u16, retry_after_ms: Option<u64>, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorPayload>(body)
        .map(|p| p.error.message)
        .unwrap_or_else(|_| body.to_string());
    match status {
        401 | 403 => LlmError::AuthenticationFailed,
        400 | 404 | 413 => LlmError::InvalidRequest(message),
        429 => LlmError::RateLimited { retry_after_ms },
        529 => LlmError::Overloaded(message),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {message}"),
        },
    }
}

/// `retry-after` is in whole seconds.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

/// Process one SSE event into zero or more `StreamEvent`s.
pub(crate) fn process_anthropic_event(
    event_type: &str,
    json_data: &str,
    state: &mut StreamState,
) -> Result<Vec<StreamEvent>, LlmError> {
    let mut events = Vec::new();

    match event_type {
        "message_start" => {
            let payload: MessageStartPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("message_start: {e}")))?;
            tracing::trace!(message_id = %payload.message.id, model = %payload.message.model, "message started");
            state.message_id = Some(payload.message.id);
            if let Some(usage) = payload.message.usage {
                events.push(StreamEvent::Usage(usage.into()));
            }
        }

        "content_block_start" => {
            let payload: ContentBlockStartPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("content_block_start: {e}")))?;
            if let AnthropicContentBlock::ToolUse { ref id, ref name, .. } = payload.content_block {
                state.tool_input_buffers.insert(
                    payload.index,
                    ToolUseAccumulator {
                        id: id.clone(),
                        name: name.clone(),
                        json_buffer: String::new(),
                    },
                );
            }
            events.push(StreamEvent::ContentBlockStart {
                index: payload.index,
                content_type: payload.content_block.type_name().to_string(),
            });
        }

        "content_block_delta" => {
            let payload: ContentBlockDeltaPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("content_block_delta: {e}")))?;
            match payload.delta {
                AnthropicDelta::TextDelta { text } => {
                    events.push(StreamEvent::TextDelta {
                        index: payload.index,
                        text,
                    });
                }
                AnthropicDelta::ThinkingDelta { thinking } => {
                    events.push(StreamEvent::ThinkingDelta {
                        index: payload.index,
                        thinking,
                    });
                }
                AnthropicDelta::InputJsonDelta { partial_json } => {
                    if let Some(acc) = state.tool_input_buffers.get_mut(&payload.index) {
                        acc.json_buffer.push_str(&partial_json);
                    }
                }
                AnthropicDelta::SignatureDelta { .. } => {}
            }
        }

        "content_block_stop" => {
            let payload: ContentBlockStopPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("content_block_stop: {e}")))?;
            if let Some(acc) = state.tool_input_buffers.remove(&payload.index) {
                let input = if acc.json_buffer.trim().is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(&acc.json_buffer)
                        .map_err(|e| LlmError::Deserialization(format!("tool input JSON: {e}")))?
                };
                events.push(StreamEvent::ToolUseComplete {
                    id: acc.id,
                    name: acc.name,
                    input,
                });
            }
            events.push(StreamEvent::ContentBlockStop {
                index: payload.index,
            });
        }

        "message_delta" => {
            let payload: MessageDeltaPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("message_delta: {e}")))?;
            events.push(StreamEvent::Usage(payload.usage.into()));
            events.push(StreamEvent::MessageDelta {
                stop_reason: parse_stop_reason(payload.delta.stop_reason.as_deref()),
            });
        }

        "message_stop" => {
            events.push(StreamEvent::Done);
        }

        "ping" => {}

        "error" => {
            let payload: ErrorPayload = serde_json::from_str(json_data)
                .map_err(|e| LlmError::Deserialization(format!("error event: {e}")))?;
            return Err(error_from_type(&payload.error.error_type, payload.error.message));
        }

        unknown => {
            tracing::warn!(event_type = unknown, "unknown Anthropic event type, skipping");
        }
    }

    Ok(events)
}

/// Create a streaming SSE connection to the Anthropic Messages API.
///
/// Returns a `Stream` of [`StreamEvent`]s that maps Anthropic-specific
/// SSE events to the provider-agnostic stream event enum. The stream ends
/// after `message_stop`; a connection that closes earlier ends it without
/// a `Done` event.
pub fn create_anthropic_stream(
    client: &reqwest::Client,
    url: &str,
    body: AnthropicRequest,
    api_key: &SecretString,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
    let request = client
        .post(url)
        .header("x-api-key", api_key.expose_secret())
        .header("anthropic-version", API_VERSION)
        .header("content-type", "application/json")
        .json(&body);

    Box::pin(async_stream::try_stream! {
        let mut source = EventSource::new(request)
            .map_err(|e| LlmError::Stream(format!("cannot open event stream: {e}")))?;
        let mut state = StreamState::default();

        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => yield StreamEvent::Connected,
                Ok(Event::Message(message)) => {
                    let stream_events = process_anthropic_event(&message.event, &message.data, &mut state)?;
                    let mut done = false;
                    for ev in stream_events {
                        done |= matches!(ev, StreamEvent::Done);
                        yield ev;
                    }
                    if done {
                        source.close();
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    tracing::debug!(message_id = ?state.message_id, "event stream closed by server");
                    break;
                }
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    source.close();
                    let retry_after = retry_after_ms(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(status = %status, body = %body, "Anthropic stream API error response");
                    Err::<(), LlmError>(status_error(status.as_u16(), retry_after, &body))?;
                }
                Err(e) => {
                    source.close();
                    Err::<(), LlmError>(LlmError::Stream(e.to_string()))?;
                }
            }
        }
    })
}
