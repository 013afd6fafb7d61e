//! Per-thread checkpoint manager with rollback.
//!
//! Disabled by default: every call is then a safe no-op. When enabled,
//! checkpoints are appended to a time-ordered list per thread, capped at
//! `max_per_thread` (oldest evicted) and swept after `ttl_secs`. Payloads are
//! stored in the tagged encoding from [`super::codec`].

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use turnflow_types::checkpoint::{CheckpointRecord, CheckpointStats};
use turnflow_types::config::CheckpointSettings;
use turnflow_types::state::ExecutionState;
use uuid::Uuid;

use super::codec::{self, CheckpointValue};

/// State key marking a rollback that could not restore the real payload.
pub const ROLLBACK_PLACEHOLDER_KEY: &str = "_rollback_placeholder";

/// Upper bound on the TTL (100 years) so cutoff arithmetic cannot overflow.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint serialization failed: {0}")]
    Serialization(String),
}

// ---------------------------------------------------------------------------
// Rollback result
// ---------------------------------------------------------------------------

/// Outcome of a rollback.
#[derive(Debug, Clone, PartialEq)]
pub enum Rollback {
    /// The checkpointed state, exactly as saved.
    Restored(ExecutionState),
    /// The payload could not be retrieved; the state only carries rollback
    /// metadata and `_rollback_placeholder: true`.
    Placeholder(ExecutionState),
}

impl Rollback {
    pub fn state(&self) -> &ExecutionState {
        match self {
            Rollback::Restored(s) | Rollback::Placeholder(s) => s,
        }
    }

    pub fn into_state(self) -> ExecutionState {
        match self {
            Rollback::Restored(s) | Rollback::Placeholder(s) => s,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Rollback::Placeholder(_))
    }
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    record: CheckpointRecord,
    payload: Option<String>,
}

#[derive(Debug)]
pub struct CheckpointManager {
    settings: CheckpointSettings,
    threads: DashMap<String, Vec<StoredCheckpoint>>,
}

impl CheckpointManager {
    pub fn new(settings: CheckpointSettings) -> Self {
        Self {
            settings,
            threads: DashMap::new(),
        }
    }

    /// A manager whose every call is a no-op.
    pub fn disabled() -> Self {
        Self::new(CheckpointSettings::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn settings(&self) -> &CheckpointSettings {
        &self.settings
    }

    /// A fresh thread id for callers without a conversation id.
    pub fn generate_thread_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Save `state` for `thread_id`. Returns the new checkpoint id, or `None`
    /// when checkpointing is disabled.
    pub fn create_checkpoint(
        &self,
        thread_id: &str,
        state: &ExecutionState,
        step_name: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Option<String>, CheckpointError> {
        if !self.settings.enabled {
            return Ok(None);
        }

        let encoded = codec::encode(&CheckpointValue::from_json(&state.to_value()));
        let payload =
            serde_json::to_string(&encoded).map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let record = CheckpointRecord {
            checkpoint_id: Uuid::now_v7().to_string(),
            thread_id: thread_id.to_string(),
            timestamp: Utc::now(),
            step_name: step_name.to_string(),
            size_bytes: payload.len(),
            metadata: metadata.unwrap_or_default(),
        };
        let checkpoint_id = record.checkpoint_id.clone();

        let mut entry = self.threads.entry(thread_id.to_string()).or_default();
        entry.push(StoredCheckpoint {
            record,
            payload: Some(payload),
        });
        let max = self.settings.max_per_thread.max(1);
        if entry.len() > max {
            let evicted = entry.len() - max;
            entry.drain(..evicted);
            tracing::debug!(thread_id, evicted, "evicted oldest checkpoints");
        }
        drop(entry);

        tracing::debug!(thread_id, %checkpoint_id, step_name, "checkpoint created");
        Ok(Some(checkpoint_id))
    }

    /// Restore the checkpoint `checkpoint_id`, or the most recent one when
    /// `None`. Returns `None` when nothing matches.
    pub fn rollback(&self, thread_id: &str, checkpoint_id: Option<&str>) -> Option<Rollback> {
        if !self.settings.enabled {
            return None;
        }
        self.sweep_thread(thread_id, Utc::now());

        let stored = {
            let entry = self.threads.get(thread_id)?;
            match checkpoint_id {
                Some(id) => entry.iter().find(|c| c.record.checkpoint_id == id).cloned(),
                None => entry.last().cloned(),
            }
        }?;

        match stored.payload.as_deref().and_then(decode_payload) {
            Some(state) => {
                tracing::info!(thread_id, checkpoint_id = %stored.record.checkpoint_id, "rolled back to checkpoint");
                Some(Rollback::Restored(state))
            }
            None => {
                tracing::warn!(
                    thread_id,
                    checkpoint_id = %stored.record.checkpoint_id,
                    "checkpoint payload unavailable, returning placeholder"
                );
                Some(Rollback::Placeholder(placeholder(&stored.record)))
            }
        }
    }

    /// Records for `thread_id`, newest first.
    pub fn list_checkpoints(&self, thread_id: &str) -> Vec<CheckpointRecord> {
        self.threads
            .get(thread_id)
            .map(|entry| entry.iter().rev().map(|c| c.record.clone()).collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, thread_id: &str) -> Option<CheckpointRecord> {
        self.threads
            .get(thread_id)
            .and_then(|entry| entry.last().map(|c| c.record.clone()))
    }

    /// Drop every checkpoint of `thread_id`. Returns how many were removed.
    pub fn clear_thread(&self, thread_id: &str) -> usize {
        self.threads.remove(thread_id).map_or(0, |(_, list)| list.len())
    }

    /// Remove checkpoints older than the TTL and any emptied threads.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub(crate) fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl();
        let mut removed = 0;
        self.threads.retain(|_, list| {
            let before = list.len();
            list.retain(|c| c.record.timestamp > cutoff);
            removed += before - list.len();
            !list.is_empty()
        });
        if removed > 0 {
            tracing::debug!(removed, "expired checkpoints swept");
        }
        removed
    }

    pub fn stats(&self) -> CheckpointStats {
        let mut stats = CheckpointStats {
            threads: self.threads.len(),
            ..Default::default()
        };
        for entry in self.threads.iter() {
            stats.checkpoints += entry.len();
            stats.total_bytes += entry.iter().map(|c| c.record.size_bytes).sum::<usize>();
        }
        stats
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.settings.ttl_secs.min(MAX_TTL_SECS) as i64)
    }

    fn sweep_thread(&self, thread_id: &str, now: DateTime<Utc>) {
        let cutoff = now - self.ttl();
        if let Some(mut list) = self.threads.get_mut(thread_id) {
            list.retain(|c| c.record.timestamp > cutoff);
        }
        // Emptiness is re-checked under the shard lock.
        self.threads.remove_if(thread_id, |_, list| list.is_empty());
    }

    #[cfg(test)]
    fn drop_payload(&self, thread_id: &str, checkpoint_id: &str) {
        if let Some(mut list) = self.threads.get_mut(thread_id) {
            for c in list.iter_mut().filter(|c| c.record.checkpoint_id == checkpoint_id) {
                c.payload = None;
            }
        }
    }
}

impl Default for CheckpointManager {
    fn default() -> Self {
        Self::disabled()
    }
}

fn decode_payload(payload: &str) -> Option<ExecutionState> {
    let wire: Value = serde_json::from_str(payload).ok()?;
    let value = codec::decode(&wire).ok()?;
    ExecutionState::from_value(value.to_json())
}

fn placeholder(record: &CheckpointRecord) -> ExecutionState {
    let mut state = ExecutionState::new();
    state.insert(ROLLBACK_PLACEHOLDER_KEY, Value::Bool(true));
    state.insert("checkpoint_id", Value::String(record.checkpoint_id.clone()));
    state.insert("thread_id", Value::String(record.thread_id.clone()));
    state.insert("step_name", Value::String(record.step_name.clone()));
    state.insert("checkpoint_timestamp", Value::String(record.timestamp.to_rfc3339()));
    state
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enabled(max: usize) -> CheckpointManager {
        CheckpointManager::new(CheckpointSettings {
            enabled: true,
            max_per_thread: max,
            ttl_secs: 3_600,
        })
    }

    fn state(step: usize) -> ExecutionState {
        let mut s = ExecutionState::from_query("q");
        s.insert("step", json!(step));
        s
    }

    #[test]
    fn test_disabled_is_noop() {
        let mgr = CheckpointManager::disabled();
        assert_eq!(mgr.create_checkpoint("t", &state(1), "a", None).unwrap(), None);
        assert!(mgr.rollback("t", None).is_none());
        assert!(mgr.list_checkpoints("t").is_empty());
        assert_eq!(mgr.stats(), CheckpointStats::default());
    }

    #[test]
    fn test_rollback_latest_and_by_id() {
        let mgr = enabled(10);
        let first = mgr.create_checkpoint("t", &state(1), "refiner", None).unwrap().unwrap();
        mgr.create_checkpoint("t", &state(2), "critic,historian", None).unwrap();

        let latest = mgr.rollback("t", None).unwrap();
        assert!(!latest.is_placeholder());
        assert_eq!(latest.state().get("step"), Some(&json!(2)));

        let earlier = mgr.rollback("t", Some(&first)).unwrap();
        assert_eq!(earlier.into_state(), state(1));

        assert!(mgr.rollback("t", Some("missing")).is_none());
        assert!(mgr.rollback("other", None).is_none());
    }

    #[test]
    fn test_cap_keeps_newest() {
        let mgr = enabled(3);
        for i in 0..7 {
            mgr.create_checkpoint("t", &state(i), &format!("s{i}"), None).unwrap();
        }
        let listed = mgr.list_checkpoints("t");
        let steps: Vec<&str> = listed.iter().map(|r| r.step_name.as_str()).collect();
        assert_eq!(steps, vec!["s6", "s5", "s4"]);
        assert_eq!(mgr.latest("t").unwrap().step_name, "s6");
    }

    #[test]
    fn test_ttl_sweep_removes_empty_threads() {
        let mgr = enabled(10);
        mgr.create_checkpoint("t1", &state(1), "a", None).unwrap();
        mgr.create_checkpoint("t2", &state(1), "a", None).unwrap();
        assert_eq!(mgr.cleanup_expired(), 0);

        let later = Utc::now() + Duration::seconds(3_601);
        assert_eq!(mgr.cleanup_expired_at(later), 2);
        assert_eq!(mgr.stats().threads, 0);
    }

    #[test]
    fn test_sweep_thread_keeps_repopulated_thread() {
        let mgr = enabled(10);
        mgr.create_checkpoint("t", &state(1), "a", None).unwrap();
        mgr.sweep_thread("t", Utc::now() + Duration::seconds(3_601));
        assert!(mgr.list_checkpoints("t").is_empty());
        assert_eq!(mgr.stats().threads, 0);

        mgr.create_checkpoint("t", &state(2), "b", None).unwrap();
        mgr.sweep_thread("t", Utc::now());
        assert_eq!(mgr.latest("t").unwrap().step_name, "b");
        assert_eq!(mgr.stats().threads, 1);
    }

    #[test]
    fn test_missing_payload_degrades_to_placeholder() {
        let mgr = enabled(10);
        let id = mgr.create_checkpoint("t", &state(1), "refiner", None).unwrap().unwrap();
        mgr.drop_payload("t", &id);

        let rollback = mgr.rollback("t", None).unwrap();
        assert!(rollback.is_placeholder());
        let s = rollback.state();
        assert_eq!(s.get(ROLLBACK_PLACEHOLDER_KEY), Some(&json!(true)));
        assert_eq!(s.get_str("checkpoint_id"), Some(id.as_str()));
        assert_eq!(s.get_str("step_name"), Some("refiner"));
    }

    #[test]
    fn test_stats_and_clear() {
        let mgr = enabled(10);
        mgr.create_checkpoint("t", &state(1), "a", Some(Map::new())).unwrap();
        mgr.create_checkpoint("t", &state(2), "b", None).unwrap();
        let stats = mgr.stats();
        assert_eq!(stats.threads, 1);
        assert_eq!(stats.checkpoints, 2);
        assert!(stats.total_bytes > 0);

        assert_eq!(mgr.clear_thread("t"), 2);
        assert_eq!(mgr.clear_thread("t"), 0);
    }

    #[test]
    fn test_generated_thread_ids_are_unique() {
        assert_ne!(
            CheckpointManager::generate_thread_id(),
            CheckpointManager::generate_thread_id()
        );
    }
}
