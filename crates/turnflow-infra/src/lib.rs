//! Infrastructure layer for turnflow.
//!
//! Contains implementations of the ports defined in `turnflow-core`: the
//! SQLite conversation state store, the `config.toml` loader and a
//! directory-backed workflow library.

pub mod config;
pub mod sqlite;
pub mod workflow;
