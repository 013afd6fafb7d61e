//! Conversation state store port.
//!
//! The store persists one snapshot map per conversation id. The pipeline
//! wraps state before saving and unwraps on load (see `snapshot`); stores
//! only move maps around. Last write wins.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use turnflow_types::error::StoreError;

pub trait ConversationStateStore: Send + Sync {
    /// Load the snapshot for `conversation_id`, `None` if never saved.
    fn load(
        &self,
        conversation_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Map<String, Value>>, StoreError>> + Send;

    /// Replace the snapshot for `conversation_id`.
    fn save(
        &self,
        conversation_id: &str,
        snapshot: &Map<String, Value>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

impl<T: ConversationStateStore> ConversationStateStore for Arc<T> {
    async fn load(&self, conversation_id: &str) -> Result<Option<Map<String, Value>>, StoreError> {
        self.as_ref().load(conversation_id).await
    }

    async fn save(&self, conversation_id: &str, snapshot: &Map<String, Value>) -> Result<(), StoreError> {
        self.as_ref().save(conversation_id, snapshot).await
    }
}

/// Process-local store.
///
/// Snapshots do not survive a restart and are invisible to other workers,
/// so this is a degraded single-worker mode.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    snapshots: DashMap<String, Map<String, Value>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        tracing::warn!("using in-memory conversation store; state is not shared across workers");
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl ConversationStateStore for InMemoryConversationStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<Map<String, Value>>, StoreError> {
        Ok(self.snapshots.get(conversation_id).map(|s| s.clone()))
    }

    async fn save(&self, conversation_id: &str, snapshot: &Map<String, Value>) -> Result<(), StoreError> {
        self.snapshots.insert(conversation_id.to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_last_write_wins() {
        let store = InMemoryConversationStore::new();
        assert!(store.load("c1").await.unwrap().is_none());

        let mut first = Map::new();
        first.insert("route".to_string(), json!("standard"));
        store.save("c1", &first).await.unwrap();

        let mut second = Map::new();
        second.insert("route".to_string(), json!("parallel"));
        store.save("c1", &second).await.unwrap();

        assert_eq!(store.load("c1").await.unwrap(), Some(second));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_arc_store_delegates() {
        let store = Arc::new(InMemoryConversationStore::new());
        store.save("c2", &Map::new()).await.unwrap();
        assert!(store.load("c2").await.unwrap().is_some());
    }
}
