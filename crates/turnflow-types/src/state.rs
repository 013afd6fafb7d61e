//! Turn-scoped execution state.
//!
//! `ExecutionState` is the mutable string→JSON map that flows through one
//! turn: seeded from the incoming query, optionally replaced by a restored
//! snapshot, mutated by collaborators and graph nodes, then persisted.
//! It serializes transparently as a plain JSON object so snapshots stay
//! readable by any store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pending::PendingAction;

/// Well-known state keys.
pub mod keys {
    pub const WORKFLOW_ID: &str = "workflow_id";
    pub const EXECUTION_ID: &str = "execution_id";
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const QUERY: &str = "query";
    pub const ORIGINAL_QUERY: &str = "original_query";
    pub const EFFECTIVE_QUERY: &str = "effective_query";
    pub const ROUTE: &str = "route";
    pub const ROUTE_LOCKED: &str = "route_locked";
    pub const ENTRY_POINT: &str = "entry_point";
    pub const NEXT_NODE: &str = "next_node";
    pub const PENDING_ACTION: &str = "pending_action";
    pub const PENDING_ACTION_RESULT: &str = "pending_action_result";
    pub const PENDING_ACTION_RESUME_TURN: &str = "pending_action_resume_turn";
    pub const WIZARD: &str = "wizard";
    pub const WIZARD_OUTPUTS: &str = "wizard_outputs";
    pub const AGENT_OUTPUTS: &str = "agent_outputs";
    pub const NODE_RESULTS: &str = "node_results";
    pub const SUCCESSFUL_AGENTS: &str = "successful_agents";
    pub const FAILED_AGENTS: &str = "failed_agents";
    pub const ERRORS: &str = "errors";
    pub const SIGNALS: &str = "signals";
    pub const CLASSIFICATION: &str = "classification";
    pub const FINAL: &str = "final";
    pub const RESPONSE: &str = "response";
    pub const FINAL_ANSWER: &str = "final_answer";
}

/// Keys that always describe the *current* turn and are never taken from a
/// restored snapshot.
pub const TURN_LOCAL_KEYS: &[&str] = &[
    keys::WORKFLOW_ID,
    keys::EXECUTION_ID,
    keys::CONVERSATION_ID,
    keys::CORRELATION_ID,
    keys::QUERY,
    keys::ORIGINAL_QUERY,
    keys::EFFECTIVE_QUERY,
];

/// Mutable turn-scoped map of string keys to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionState(Map<String, Value>);

impl ExecutionState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Seed a fresh state from the raw user query.
    ///
    /// The route is deliberately left unset: it is assigned when the
    /// execution plan is applied.
    pub fn from_query(query: &str) -> Self {
        let mut state = Self::new();
        state.insert(keys::QUERY, Value::String(query.to_string()));
        state.insert(keys::ORIGINAL_QUERY, Value::String(query.to_string()));
        state.insert(keys::EFFECTIVE_QUERY, Value::String(query.to_string()));
        state.insert(keys::ROUTE_LOCKED, Value::Bool(false));
        state.insert(keys::PENDING_ACTION_RESUME_TURN, Value::Bool(false));
        state.insert(keys::AGENT_OUTPUTS, Value::Object(Map::new()));
        state.insert(keys::SUCCESSFUL_AGENTS, Value::Array(Vec::new()));
        state.insert(keys::FAILED_AGENTS, Value::Array(Vec::new()));
        state.insert(keys::ERRORS, Value::Array(Vec::new()));
        state
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build from a JSON value; non-objects yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// String value at `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Boolean value at `key`; absent or non-boolean reads as `false`.
    pub fn get_flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), Value::String(value.into()));
    }

    pub fn route(&self) -> Option<&str> {
        self.get_str(keys::ROUTE)
    }

    pub fn set_route(&mut self, route: impl Into<String>) {
        self.set_str(keys::ROUTE, route);
    }

    pub fn next_node(&self) -> Option<&str> {
        self.get_str(keys::NEXT_NODE)
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.get_str(keys::ENTRY_POINT)
    }

    pub fn route_locked(&self) -> bool {
        self.get_flag(keys::ROUTE_LOCKED)
    }

    pub fn effective_query(&self) -> Option<&str> {
        self.get_str(keys::EFFECTIVE_QUERY)
    }

    /// The pending action, coerced from whatever is stored.
    pub fn pending_action(&self) -> Option<PendingAction> {
        self.0.get(keys::PENDING_ACTION).and_then(PendingAction::from_value)
    }

    /// Store or clear the pending action. `None` removes the key entirely.
    pub fn set_pending_action(&mut self, action: Option<&PendingAction>) {
        match action {
            Some(pa) => {
                self.0.insert(keys::PENDING_ACTION.to_string(), pa.to_value());
            }
            None => {
                self.0.remove(keys::PENDING_ACTION);
            }
        }
    }

    /// Whether a pending action is currently waiting on user input.
    pub fn is_awaiting_input(&self) -> bool {
        self.pending_action().is_some_and(|pa| pa.awaiting)
    }

    /// Copy every key from `base` that this state does not already have.
    ///
    /// Keys present here win; `base` only fills gaps.
    pub fn merge_under(&mut self, base: &ExecutionState) {
        for (key, value) in &base.0 {
            if !self.0.contains_key(key) {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Append `value` to the array at `key`, creating the array if needed.
    /// A non-array value at `key` is replaced.
    pub fn push_to_list(&mut self, key: &str, value: Value) {
        let entry = self
            .0
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
            items.push(value);
        }
    }

    /// Insert `value` under `field` of the object at `key`, creating the
    /// object if needed.
    pub fn insert_in_object(&mut self, key: &str, field: &str, value: Value) {
        let entry = self
            .0
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(obj) = entry {
            obj.insert(field.to_string(), value);
        }
    }

    /// Strings in the array at `key`, skipping non-string entries.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Outputs written by agent nodes, keyed by agent name.
    pub fn agent_outputs(&self) -> Option<&Map<String, Value>> {
        self.0.get(keys::AGENT_OUTPUTS).and_then(Value::as_object)
    }
}

impl From<Map<String, Value>> for ExecutionState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<ExecutionState> for Value {
    fn from(state: ExecutionState) -> Self {
        Value::Object(state.0)
    }
}
