//! AnthropicProvider -- concrete [`LlmProvider`] implementation for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`) with
//! proper authentication headers. Supports both non-streaming (`complete`)
//! and streaming (`stream`) modes, including tool definitions and
//! tool_use/tool_result content blocks.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use secrecy::{ExposeSecret, SecretString};

use pagewright_core::llm::provider::LlmProvider;
use pagewright_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StreamEvent,
};

use super::streaming::{API_VERSION, create_anthropic_stream, retry_after_ms, status_error};
use super::types::{
    AnthropicContentBlock, AnthropicMessage, AnthropicNonStreamResponse, AnthropicRequest,
    AnthropicTool, parse_stop_reason,
};

/// Anthropic Claude LLM provider.
///
/// The API key is only exposed when constructing HTTP request headers.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    capabilities: ProviderCapabilities,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// `timeout` bounds each HTTP request, streaming included.
    pub fn new(api_key: SecretString, model: String, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        let capabilities = Self::capabilities_for_model(&model);

        Ok(Self {
            client,
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model,
            capabilities,
        })
    }

    /// The default model for this provider.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn capabilities_for_model(model: &str) -> ProviderCapabilities {
        let max_output_tokens = if model.contains("opus") {
            32_000
        } else if model.contains("sonnet") || model.contains("haiku") {
            8_192
        } else {
            // Conservative default for unknown models
            4_096
        };
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            max_context_tokens: 200_000,
            max_output_tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Convert a generic [`CompletionRequest`] into an [`AnthropicRequest`].
    ///
    /// An empty `model` falls back to the provider's configured model.
    fn to_anthropic_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();

        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        AnthropicRequest {
            model,
            max_tokens: request.max_tokens,
            messages,
            system: request.system.clone(),
            stream,
            temperature: request.temperature,
            stop_sequences: request.stop_sequences.clone(),
            tools: request.tools.iter().map(AnthropicTool::from).collect(),
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.to_anthropic_request(request, false);

        let response = self
            .client
            .post(self.url("/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Anthropic API error response");
            return Err(status_error(status.as_u16(), retry_after, &error_body));
        }

        let anthropic_resp: AnthropicNonStreamResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let content = anthropic_resp
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            id: anthropic_resp.id,
            content,
            model: anthropic_resp.model,
            stop_reason: parse_stop_reason(anthropic_resp.stop_reason.as_deref()),
            usage: anthropic_resp.usage.into(),
        })
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let body = self.to_anthropic_request(&request, true);
        create_anthropic_stream(&self.client, &self.url("/v1/messages"), body, &self.api_key)
    }
}
