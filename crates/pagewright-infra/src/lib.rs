//! Infrastructure layer for Pagewright.
//!
//! Contains implementations of the traits defined in `pagewright-core`:
//! SQLite storage for projects and build sessions, the Anthropic model
//! client, the concrete build tools, and configuration loading.

pub mod config;
pub mod llm;
pub mod sqlite;
pub mod tools;
