//! LLM provider implementations.
//!
//! Contains the Anthropic implementation of the [`LlmProvider`] trait
//! defined in `pagewright-core`, plus a factory that builds it from
//! [`GlobalConfig`].
//!
//! [`LlmProvider`]: pagewright_core::llm::provider::LlmProvider

pub mod anthropic;

use std::time::Duration;

use secrecy::SecretString;

use pagewright_core::llm::box_provider::BoxLlmProvider;
use pagewright_types::config::GlobalConfig;
use pagewright_types::llm::LlmError;

use self::anthropic::AnthropicProvider;

/// Build the model provider from configuration and a resolved API key.
pub fn create_provider(
    config: &GlobalConfig,
    api_key: SecretString,
) -> Result<BoxLlmProvider, LlmError> {
    let mut provider = AnthropicProvider::new(
        api_key,
        config.model.clone(),
        Duration::from_secs(config.turn_timeout_secs),
    )?;
    if let Some(base_url) = config.api_base_url.as_deref() {
        provider = provider.with_base_url(base_url.to_string());
    }
    Ok(BoxLlmProvider::new(provider))
}
