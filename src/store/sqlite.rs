//! SQLite-backed [`MessageStore`].

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};

use super::{MessageStore, StorageError, Turn};

/// Default database location, relative to the working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://chat_history.db";

const CREATE_MESSAGES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    is_user BOOLEAN NOT NULL DEFAULT 1,
    timestamp DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)";

const CREATE_CONTENT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS ix_messages_content ON messages (content)";

/// Message store over a `sqlx` SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Open (creating if missing) the database at `database_url` and ensure the
    /// `messages` table exists.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let in_memory = is_in_memory(database_url);

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Each connection to an in-memory database sees its own database.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(CREATE_MESSAGES_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_CONTENT_INDEX).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store, mainly for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::new("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight statements.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn turn_from_row(row: &SqliteRow) -> Result<Turn, sqlx::Error> {
    Ok(Turn {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        is_user: row.try_get("is_user")?,
        timestamp: row.try_get("timestamp")?,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, content: &str, is_user: bool) -> Result<Turn, StorageError> {
        let row = sqlx::query(
            r"
            INSERT INTO messages (content, is_user)
            VALUES (?1, ?2)
            RETURNING id, content, is_user, timestamp
            ",
        )
        .bind(content)
        .bind(is_user)
        .fetch_one(&self.pool)
        .await?;

        let turn = turn_from_row(&row)?;
        tracing::debug!(
            name: "chat.turn.persisted",
            turn_id = turn.id,
            is_user = turn.is_user,
            content_length = turn.content.len(),
            "Turn persisted"
        );
        Ok(turn)
    }

    async fn list_all(&self) -> Result<Vec<Turn>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, content, is_user, timestamp FROM messages ORDER BY timestamp ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(turn_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::from)
    }
}
