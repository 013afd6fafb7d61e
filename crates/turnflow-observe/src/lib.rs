//! Observability setup for turnflow binaries.

pub mod tracing_setup;
