//! SQLite storage layer.
//!
//! Store implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod conversation;
pub mod pool;

pub use conversation::{ConversationSummary, SqliteConversationStore};
pub use pool::DatabasePool;
