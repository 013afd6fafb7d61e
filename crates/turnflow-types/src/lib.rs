//! Shared domain types for turnflow.
//!
//! This crate contains the data model used across the turnflow workspace:
//! execution state, pending actions, workflow definitions, execution plans,
//! checkpoint records, lifecycle events, configuration, and error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror, schemars.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod pending;
pub mod plan;
pub mod state;
pub mod turn;
pub mod workflow;
