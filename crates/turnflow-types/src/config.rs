//! Global configuration types for turnflow.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls
//! pipeline timeouts, compiler limits, checkpointing, and the conversation
//! store location. Every field has a default so an empty file is valid.

use serde::{Deserialize, Serialize};

use crate::plan::{DEFAULT_NODE_TIMEOUT_SECS, DEFAULT_TURN_TIMEOUT_SECS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub compiler: CompilerSettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

/// `[pipeline]` section: per-turn defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    #[serde(default)]
    pub enable_retrieval: bool,
    #[serde(default = "default_true")]
    pub parallel_execution: bool,
    /// Agents used when neither the request nor the plan names any.
    #[serde(default)]
    pub default_agents: Vec<String>,
    /// Capacity of the lifecycle event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            turn_timeout_secs: default_turn_timeout(),
            node_timeout_secs: default_node_timeout(),
            enable_retrieval: false,
            parallel_execution: true,
            default_agents: Vec::new(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// `[compiler]` section: workflow size limits and advisories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerSettings {
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    #[serde(default = "default_max_edges")]
    pub max_edges: usize,
    /// Depth above which a non-fatal advisory is emitted.
    #[serde(default = "default_max_depth_advisory")]
    pub max_depth_advisory: usize,
    #[serde(default)]
    pub allow_cycles: bool,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
            max_edges: default_max_edges(),
            max_depth_advisory: default_max_depth_advisory(),
            allow_cycles: false,
        }
    }
}

/// `[checkpoint]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_per_thread")]
    pub max_per_thread: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_per_thread: default_max_per_thread(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite URL. `None` means `{data_dir}/turnflow.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_turn_timeout() -> u64 {
    DEFAULT_TURN_TIMEOUT_SECS
}

fn default_node_timeout() -> u64 {
    DEFAULT_NODE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_nodes() -> usize {
    100
}

fn default_max_edges() -> usize {
    500
}

fn default_max_depth_advisory() -> usize {
    20
}

fn default_max_per_thread() -> usize {
    10
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}
