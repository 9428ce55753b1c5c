//! Shared domain types for Pagewright.
//!
//! This crate contains the domain types used across the Pagewright build
//! orchestrator: projects, build sessions and their stream signals,
//! conversation turns, tool calls, LLM request/response shapes, and
//! configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod build;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod project;
pub mod tool;
