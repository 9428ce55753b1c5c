//! Build orchestration logic and repository trait definitions for Pagewright.
//!
//! This crate defines the build state machine, the agent loop, and the
//! "ports" (repository and provider traits) that the infrastructure layer
//! implements. It depends only on `pagewright-types` -- never on
//! `pagewright-infra` or any database/IO crate.

pub mod build;
pub mod llm;
pub mod repository;
