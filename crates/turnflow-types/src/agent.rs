//! Agent invocation types.
//!
//! Concrete agent bodies live outside the core; these types define the
//! contract a base node uses to call one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::ExecutionState;

/// Input handed to an agent by its base node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    /// Registered agent name.
    pub agent_name: String,
    /// Node id the agent runs under.
    pub node_id: String,
    /// Effective query for this turn.
    pub query: String,
    /// Snapshot of the state at wave start. Agents never mutate shared state
    /// directly; they return `state_updates` instead.
    pub state: ExecutionState,
    /// Node-level configuration from the workflow definition.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Result returned by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Primary textual output.
    pub content: String,
    /// Keys merged into the top level of the execution state after the wave.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state_updates: Map<String, Value>,
    /// Free-form metadata (confidence, token usage, sources).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl AgentOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_update(mut self, key: &str, value: Value) -> Self {
        self.state_updates.insert(key.to_string(), value);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Confidence reported in metadata, if any.
    pub fn confidence(&self) -> Option<f64> {
        self.metadata.get("confidence").and_then(Value::as_f64)
    }

    /// JSON form stored under `agent_outputs.<agent>`.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("content".to_string(), Value::String(self.content.clone()));
        if !self.metadata.is_empty() {
            obj.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        }
        Value::Object(obj)
    }
}
