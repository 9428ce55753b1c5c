//! HTTP/REST API layer for Pagewright.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format,
//! permissive CORS, and SSE for build turns.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
