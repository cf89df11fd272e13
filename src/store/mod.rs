//! Durable storage of chat turns.
//!
//! Every message that passes through the relay, user or assistant, is
//! recorded as an immutable [`Turn`]. The store only appends and lists;
//! rows are never updated or deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod sqlite;

pub use sqlite::SqliteMessageStore;

/// One persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Auto-increment row id.
    pub id: i64,
    /// Raw user text, or rendered HTML for assistant turns.
    pub content: String,
    /// `true` for user-authored turns.
    pub is_user: bool,
    /// Server-assigned insertion time.
    pub timestamp: DateTime<Utc>,
}

/// Public view of a turn returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub content: String,
    pub is_user: bool,
}

impl From<Turn> for HistoryEntry {
    fn from(turn: Turn) -> Self {
        Self {
            content: turn.content,
            is_user: turn.is_user,
        }
    }
}

/// Errors raised by a message store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The database is unreachable or rejected the statement.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Append-only store of chat turns.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Insert a turn and commit it immediately.
    ///
    /// The store assigns the id and timestamp.
    async fn save(&self, content: &str, is_user: bool) -> Result<Turn, StorageError>;

    /// Every turn, ordered by timestamp ascending.
    async fn list_all(&self) -> Result<Vec<Turn>, StorageError>;
}
