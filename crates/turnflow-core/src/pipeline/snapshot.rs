//! Conversation snapshot wrapping and turn-state seeding.
//!
//! Saved snapshots look like
//! `{"execution_state": {...}, "saved_at": "...", "schema_version": 1}`.
//! Loading accepts that shape or a bare state map.

use chrono::Utc;
use serde_json::{Map, Value, json};
use turnflow_types::pending::PendingAction;
use turnflow_types::state::{ExecutionState, TURN_LOCAL_KEYS, keys};

pub const EXECUTION_STATE_KEY: &str = "execution_state";
pub const SAVED_AT_KEY: &str = "saved_at";
pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Keys every turn starts afresh, in addition to the turn-local ids and
/// query fields.
pub const TURN_RESET_KEYS: &[&str] = &[keys::PENDING_ACTION_RESUME_TURN];

/// Wrap `state` for persistence.
pub fn wrap(state: &ExecutionState) -> Map<String, Value> {
    let mut snapshot = Map::new();
    snapshot.insert(EXECUTION_STATE_KEY.to_string(), state.to_value());
    snapshot.insert(SAVED_AT_KEY.to_string(), json!(Utc::now().to_rfc3339()));
    snapshot.insert(SCHEMA_VERSION_KEY.to_string(), json!(SNAPSHOT_SCHEMA_VERSION));
    snapshot
}

/// Recover the state from a stored snapshot, wrapped or bare.
pub fn unwrap(mut snapshot: Map<String, Value>) -> ExecutionState {
    match snapshot.remove(EXECUTION_STATE_KEY) {
        Some(Value::Object(inner)) => ExecutionState::from_map(inner),
        Some(other) => {
            // Not the wrapped shape after all; keep the key as data.
            snapshot.insert(EXECUTION_STATE_KEY.to_string(), other);
            ExecutionState::from_map(snapshot)
        }
        None => ExecutionState::from_map(snapshot),
    }
}

/// Drop `pending_action` and `wizard` values that are not usable maps.
/// Returns the keys removed.
pub fn sanitize(state: &mut ExecutionState) -> Vec<&'static str> {
    let mut removed = Vec::new();
    if state.contains_key(keys::PENDING_ACTION) {
        let usable = state
            .get(keys::PENDING_ACTION)
            .and_then(PendingAction::from_value)
            .is_some();
        if !usable {
            state.remove(keys::PENDING_ACTION);
            removed.push(keys::PENDING_ACTION);
        }
    }
    if state.get(keys::WIZARD).is_some_and(|w| !w.is_object()) {
        state.remove(keys::WIZARD);
        removed.push(keys::WIZARD);
    }
    removed
}

/// Build the state a turn starts from.
///
/// Restored keys win, except the turn-local ids and query fields and the
/// resume flag, which always come from `fresh`.
pub fn seed_turn_state(fresh: ExecutionState, restored: Option<ExecutionState>) -> ExecutionState {
    let Some(mut state) = restored else {
        return fresh;
    };
    let removed = sanitize(&mut state);
    if !removed.is_empty() {
        tracing::warn!(keys = ?removed, "discarded malformed keys from restored state");
    }
    for key in TURN_LOCAL_KEYS.iter().chain(TURN_RESET_KEYS) {
        state.remove(key);
    }
    state.merge_under(&fresh);
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted() -> ExecutionState {
        let mut state = ExecutionState::from_query("query consents");
        state.set_str(keys::CONVERSATION_ID, "c1");
        state.set_str(keys::WORKFLOW_ID, "wf-1");
        state.set_route("standard");
        state.insert(keys::ROUTE_LOCKED, json!(true));
        state.set_pending_action(Some(&PendingAction::awaiting("confirm_table", "confirm")));
        state.insert(keys::WIZARD, json!({"confirm_table:users": {"step": "confirm"}}));
        state
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let state = persisted();
        let snapshot = wrap(&state);
        assert_eq!(snapshot[SCHEMA_VERSION_KEY], 1);
        assert!(snapshot[SAVED_AT_KEY].is_string());
        assert_eq!(unwrap(snapshot), state);
    }

    #[test]
    fn test_unwrap_accepts_bare_map() {
        let state = persisted();
        assert_eq!(unwrap(state.clone().into_map()), state);
    }

    #[test]
    fn test_unwrap_keeps_non_object_execution_state_as_data() {
        let mut raw = Map::new();
        raw.insert(EXECUTION_STATE_KEY.to_string(), json!("oops"));
        raw.insert("route".to_string(), json!("standard"));
        let state = unwrap(raw);
        assert_eq!(state.route(), Some("standard"));
        assert_eq!(state.get_str(EXECUTION_STATE_KEY), Some("oops"));
    }

    #[test]
    fn test_wrap_is_idempotent_for_state() {
        let state = persisted();
        assert_eq!(unwrap(wrap(&state)), unwrap(wrap(&unwrap(wrap(&state)))));
    }

    #[test]
    fn test_sanitize_drops_garbage() {
        let mut state = ExecutionState::new();
        state.insert(keys::PENDING_ACTION, json!("confirm_table"));
        state.insert(keys::WIZARD, json!([1, 2]));
        let removed = sanitize(&mut state);
        assert_eq!(removed, vec![keys::PENDING_ACTION, keys::WIZARD]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_seed_restored_wins_except_turn_fields() {
        let mut restored = persisted();
        restored.insert(keys::PENDING_ACTION_RESULT, json!({"status": "cancelled"}));
        restored.push_to_list(keys::ERRORS, json!({"error": "old"}));

        let mut fresh = ExecutionState::from_query("yes");
        fresh.set_str(keys::CONVERSATION_ID, "c1");
        fresh.set_str(keys::WORKFLOW_ID, "wf-2");

        let seeded = seed_turn_state(fresh, Some(restored));
        assert_eq!(seeded.get_str(keys::QUERY), Some("yes"));
        assert_eq!(seeded.get_str(keys::WORKFLOW_ID), Some("wf-2"));
        assert_eq!(seeded.route(), Some("standard"));
        assert!(seeded.route_locked());
        assert!(seeded.is_awaiting_input());
        assert_eq!(seeded.get(keys::PENDING_ACTION_RESULT), Some(&json!({"status": "cancelled"})));
        assert!(!seeded.get_flag(keys::PENDING_ACTION_RESUME_TURN));
        assert_eq!(seeded.get(keys::ERRORS), Some(&json!([{"error": "old"}])));
    }

    #[test]
    fn test_seed_restores_everything_but_turn_local_keys() {
        let mut restored = persisted();
        restored.insert(keys::FINAL, json!("the answer"));
        restored.insert(keys::PENDING_ACTION_RESUME_TURN, json!(true));
        restored.push_to_list(keys::SUCCESSFUL_AGENTS, json!("refiner"));

        let mut fresh = ExecutionState::from_query("next");
        fresh.set_str(keys::WORKFLOW_ID, "wf-2");
        let seeded = seed_turn_state(fresh, Some(restored.clone()));

        for (key, value) in restored.clone().into_map() {
            if TURN_LOCAL_KEYS.contains(&key.as_str()) || TURN_RESET_KEYS.contains(&key.as_str()) {
                continue;
            }
            assert_eq!(seeded.get(&key), Some(&value), "restored key '{key}' differs");
        }
        assert!(!seeded.get_flag(keys::PENDING_ACTION_RESUME_TURN));
    }

    #[test]
    fn test_seed_without_snapshot_is_fresh() {
        let fresh = ExecutionState::from_query("hello");
        assert_eq!(seed_turn_state(fresh.clone(), None), fresh);
    }
}
