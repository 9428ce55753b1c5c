//! Observability setup for Pagewright: structured logging through
//! `tracing` with optional OpenTelemetry span export.

pub mod tracing_setup;
