//! Checkpoint metadata records.
//!
//! A `CheckpointRecord` describes one point-in-time snapshot of execution
//! state for a thread. The payload itself is held by the checkpoint manager;
//! the record is what listings and rollbacks report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata for a single checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub checkpoint_id: String,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    /// Workflow point the checkpoint was taken at (node id or wave label).
    pub step_name: String,
    /// Size of the serialized payload in bytes.
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Aggregate counters over the checkpoint manager's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub threads: usize,
    pub checkpoints: usize,
    pub total_bytes: usize,
}
