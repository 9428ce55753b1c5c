//! HTTP request handlers for the REST API.

pub mod build;
pub mod project;
