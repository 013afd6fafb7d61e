//! Pending-action marker for multi-turn interactions.
//!
//! A `PendingAction` is persisted in the conversation snapshot while the
//! system waits on a specific user reply (a confirmation, a wizard step).
//! `awaiting` is the only signal that resume logic may act on: a record with
//! `awaiting == false` is historical and must be ignored by resume detection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload key holding the current wizard step pointer.
pub const PAYLOAD_STEP: &str = "step";

/// Payload key holding the resource a flow operates on.
pub const PAYLOAD_RESOURCE: &str = "resource";

/// A persisted marker that a multi-step interaction awaits user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Flow type (e.g. `"confirm_table"`).
    #[serde(rename = "type")]
    pub action_type: String,
    /// Whether the system is currently waiting on user input.
    #[serde(default)]
    pub awaiting: bool,
    /// Flow-specific data (step pointer, resource id, collected answers).
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl PendingAction {
    /// Create an awaiting pending action positioned at `step`.
    pub fn awaiting(action_type: impl Into<String>, step: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert(PAYLOAD_STEP.to_string(), Value::String(step.into()));
        Self {
            action_type: action_type.into(),
            awaiting: true,
            payload,
        }
    }

    /// Coerce an arbitrary JSON value into a pending action.
    ///
    /// Anything that is not an object with a non-empty string `type` yields
    /// `None`. A non-object `payload` is discarded rather than failing the
    /// whole record.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let action_type = obj.get("type")?.as_str()?.trim();
        if action_type.is_empty() {
            return None;
        }
        let awaiting = obj.get("awaiting").and_then(Value::as_bool).unwrap_or(false);
        let payload = obj
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            action_type: action_type.to_string(),
            awaiting,
            payload,
        })
    }

    /// Serialize to a JSON value for storage in `ExecutionState`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The current step pointer, if the payload carries one.
    pub fn step(&self) -> Option<&str> {
        self.payload.get(PAYLOAD_STEP).and_then(Value::as_str)
    }

    /// The resource this flow operates on, if any.
    pub fn resource(&self) -> Option<&str> {
        self.payload.get(PAYLOAD_RESOURCE).and_then(Value::as_str)
    }

    /// Return a copy positioned at a new step.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.payload
            .insert(PAYLOAD_STEP.to_string(), Value::String(step.into()));
        self
    }

    /// Return a copy bound to a resource.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.payload
            .insert(PAYLOAD_RESOURCE.to_string(), Value::String(resource.into()));
        self
    }
}
