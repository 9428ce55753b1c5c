//! Anthropic Claude LLM provider implementation.
//!
//! This module provides the [`AnthropicProvider`] which implements the
//! [`LlmProvider`](pagewright_core::llm::provider::LlmProvider) trait for
//! the Anthropic Messages API, including SSE streaming with tool use.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::AnthropicProvider;
