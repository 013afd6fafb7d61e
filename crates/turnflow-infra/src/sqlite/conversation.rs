//! SQLite conversation state store.
//!
//! Implements `ConversationStateStore` from `turnflow-core`. Each
//! conversation owns one row; saving replaces it (last write wins). Snapshots
//! are stored as JSON text.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::Row;
use turnflow_core::pipeline::ConversationStateStore;
use turnflow_types::error::StoreError;

use super::pool::DatabasePool;

/// SQLite-backed conversation state store.
#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: DatabasePool,
}

impl SqliteConversationStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Most recently updated conversations first.
    pub async fn list(&self, limit: u32) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT conversation_id, created_at, updated_at, length(snapshot) AS size_bytes
               FROM conversation_snapshots
               ORDER BY updated_at DESC
               LIMIT ?"#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                ConversationSummaryRow::from_row(row)
                    .map_err(|e| StoreError::Query(e.to_string()))
                    .and_then(ConversationSummaryRow::into_summary)
            })
            .collect()
    }

    /// Remove a conversation's snapshot. Returns whether a row existed.
    pub async fn delete(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM conversation_snapshots WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

/// One row of [`SqliteConversationStore::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ConversationSummaryRow {
    conversation_id: String,
    created_at: String,
    updated_at: String,
    size_bytes: i64,
}

impl ConversationSummaryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            conversation_id: row.try_get("conversation_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            size_bytes: row.try_get("size_bytes")?,
        })
    }

    fn into_summary(self) -> Result<ConversationSummary, StoreError> {
        Ok(ConversationSummary {
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            conversation_id: self.conversation_id,
            size_bytes: u64::try_from(self.size_bytes).unwrap_or(0),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("invalid datetime: {e}")))
}

// ---------------------------------------------------------------------------
// ConversationStateStore implementation
// ---------------------------------------------------------------------------

impl ConversationStateStore for SqliteConversationStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<Map<String, Value>>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM conversation_snapshots WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row
            .try_get("snapshot")
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(other) => Err(StoreError::Serialization(format!(
                "snapshot for '{conversation_id}' is not an object: {}",
                json_kind(&other)
            ))),
            Err(e) => Err(StoreError::Serialization(format!("invalid snapshot JSON: {e}"))),
        }
    }

    async fn save(&self, conversation_id: &str, snapshot: &Map<String, Value>) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let text = serde_json::to_string(snapshot)
            .map_err(|e| StoreError::Serialization(format!("failed to serialize snapshot: {e}")))?;

        sqlx::query(
            r#"INSERT INTO conversation_snapshots (conversation_id, snapshot, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (conversation_id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at"#,
        )
        .bind(conversation_id)
        .bind(&text)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        tracing::debug!(conversation_id, bytes = text.len(), "conversation snapshot saved");
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
