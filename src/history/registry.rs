//! Session history handles and the registry that owns them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::llm::{Message, MessageRole};

/// Append-only conversation context for one session.
///
/// Cloning a `SessionHistory` yields another handle to the same history.
/// Individual appends are atomic, but nothing serializes whole requests:
/// two concurrent requests on the same session may interleave their turns.
#[derive(Debug)]
pub struct SessionHistory {
    inner: Arc<SessionHistoryInner>,
}

#[derive(Debug)]
struct SessionHistoryInner {
    /// Session identifier.
    id: String,
    /// Prior turns, oldest first.
    messages: RwLock<Vec<Message>>,
    /// Creation time.
    created_at: DateTime<Utc>,
}

impl Clone for SessionHistory {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SessionHistory {
    fn new(id: String) -> Self {
        Self {
            inner: Arc::new(SessionHistoryInner {
                id,
                messages: RwLock::new(Vec::new()),
                created_at: Utc::now(),
            }),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Append a turn to the end of the history.
    pub fn append(&self, role: MessageRole, text: impl Into<String>) {
        self.inner
            .messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Message::new(role, text));
    }

    /// Snapshot of all turns, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of turns recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same history.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Thread-safe registry of session histories.
///
/// Constructed once at startup and shared by cloning; [`HistoryRegistry::teardown`]
/// releases every history at shutdown.
#[derive(Debug, Clone)]
pub struct HistoryRegistry {
    inner: Arc<HistoryRegistryInner>,
}

#[derive(Debug)]
struct HistoryRegistryInner {
    histories: RwLock<HashMap<String, SessionHistory>>,
}

impl Default for HistoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HistoryRegistryInner {
                histories: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get the history for `session_id`, creating an empty one if absent.
    ///
    /// Creation happens under the write lock, so concurrent first calls for
    /// the same id always observe the same history.
    #[must_use]
    pub fn get(&self, session_id: &str) -> SessionHistory {
        {
            let guard = self
                .inner
                .histories
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(history) = guard.get(session_id) {
                return history.clone();
            }
        }

        let mut guard = self
            .inner
            .histories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = %session_id, "Created session history");
                SessionHistory::new(session_id.to_string())
            })
            .clone()
    }

    /// Whether a history exists for `session_id`, without creating one.
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.inner
            .histories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    /// Number of sessions seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .histories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List all session IDs.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.inner
            .histories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Drop every history. Returns the number of sessions released.
    pub fn teardown(&self) -> usize {
        let mut guard = self
            .inner
            .histories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let count = guard.len();
        guard.clear();
        count
    }
}
