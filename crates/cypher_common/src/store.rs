//! Conversation threads and messages on SQLite.
//!
//! One connection behind an async mutex; every query runs on the blocking
//! pool. Deleting a thread cascades to its messages.

use crate::types::{ChatMessage, ConversationThread, Role, StoredMessage};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// `get_all_threads` cap
pub const MAX_THREADS: usize = 100;

/// `get_thread_messages` cap
pub const MAX_THREAD_MESSAGES: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of conversation threads
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// New thread, returns its id
    async fn create_thread(&self, title: &str) -> StoreResult<String>;

    /// Append a message and bump the thread's `updated_at`
    async fn store_message(&self, thread_id: &str, role: Role, content: &str) -> StoreResult<()>;

    /// Last `limit` messages, oldest first
    async fn get_recent_history(&self, thread_id: &str, limit: usize) -> StoreResult<Vec<ChatMessage>>;

    /// Most recently updated first, at most [`MAX_THREADS`]
    async fn get_all_threads(&self) -> StoreResult<Vec<ConversationThread>>;

    async fn get_thread(&self, thread_id: &str) -> StoreResult<Option<ConversationThread>>;

    /// Chronological, at most [`MAX_THREAD_MESSAGES`]
    async fn get_thread_messages(&self, thread_id: &str) -> StoreResult<Vec<StoredMessage>>;

    /// Whether a thread was renamed
    async fn rename_thread(&self, thread_id: &str, title: &str) -> StoreResult<bool>;

    async fn delete_thread(&self, thread_id: &str) -> StoreResult<()>;
}

/// Where the database lives
#[derive(Debug, Clone)]
pub enum StoreLocation {
    Custom(PathBuf),
    /// Private in-memory database (tests)
    InMemory,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
    location: StoreLocation,
}

impl SqliteConversationStore {
    pub async fn open(location: StoreLocation) -> StoreResult<Self> {
        let path = match &location {
            StoreLocation::Custom(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| StoreError::Io {
                            path: parent.to_path_buf(),
                            source,
                        })?;
                }
                info!("Opening conversation database at: {}", path.display());
                Some(path.clone())
            }
            StoreLocation::InMemory => None,
        };

        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            let conn = match path {
                Some(path) => {
                    let conn = Connection::open(&path)?;
                    conn.pragma_update(None, "journal_mode", "WAL")?;
                    conn.pragma_update(None, "synchronous", "NORMAL")?;
                    conn
                }
                None => Connection::open_in_memory()?,
            };
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(conn)
        })
        .await??;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        self.execute(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS threads (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_threads_updated
                 ON threads(updated_at)",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS messages (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    thread_id TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_messages_thread
                 ON messages(thread_id, seq)",
                [],
            )?;

            debug!("Conversation schema ready");
            Ok(())
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn execute<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await?
    }
}

fn parse_role(raw: &str) -> StoreResult<Role> {
    raw.parse()
        .map_err(|e: String| StoreError::Corrupt(format!("role '{}': {}", raw, e)))
}

fn thread_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationThread> {
    Ok(ConversationThread {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_thread(&self, title: &str) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let title = title.to_string();
        let thread_id = id.clone();

        self.execute(move |conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO threads (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![thread_id, title, ts],
            )?;
            Ok(())
        })
        .await?;

        debug!("Created thread {}", id);
        Ok(id)
    }

    async fn store_message(&self, thread_id: &str, role: Role, content: &str) -> StoreResult<()> {
        let thread_id = thread_id.to_string();
        let content = content.to_string();

        self.execute(move |conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO messages (id, thread_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![Uuid::new_v4().to_string(), thread_id, role.as_str(), content, ts],
            )?;
            conn.execute(
                "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
                params![ts, thread_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_recent_history(&self, thread_id: &str, limit: usize) -> StoreResult<Vec<ChatMessage>> {
        let thread_id = thread_id.to_string();

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content FROM messages
                 WHERE thread_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![thread_id, limit as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut history = rows
                .into_iter()
                .map(|(role, content)| {
                    Ok(ChatMessage {
                        role: parse_role(&role)?,
                        content,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            history.reverse();
            Ok(history)
        })
        .await
    }

    async fn get_all_threads(&self) -> StoreResult<Vec<ConversationThread>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at FROM threads
                 ORDER BY updated_at DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let threads = stmt
                .query_map(params![MAX_THREADS as i64], thread_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(threads)
        })
        .await
    }

    async fn get_thread(&self, thread_id: &str) -> StoreResult<Option<ConversationThread>> {
        let thread_id = thread_id.to_string();

        self.execute(move |conn| {
            let thread = conn
                .query_row(
                    "SELECT id, title, created_at, updated_at FROM threads WHERE id = ?1",
                    params![thread_id],
                    thread_from_row,
                )
                .optional()?;
            Ok(thread)
        })
        .await
    }

    async fn get_thread_messages(&self, thread_id: &str) -> StoreResult<Vec<StoredMessage>> {
        let thread_id = thread_id.to_string();

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, role, content, timestamp FROM messages
                 WHERE thread_id = ?1
                 ORDER BY seq ASC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![thread_id, MAX_THREAD_MESSAGES as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, thread_id, role, content, timestamp)| {
                    Ok(StoredMessage {
                        id,
                        thread_id,
                        role: parse_role(&role)?,
                        content,
                        timestamp,
                    })
                })
                .collect()
        })
        .await
    }

    async fn rename_thread(&self, thread_id: &str, title: &str) -> StoreResult<bool> {
        let thread_id = thread_id.to_string();
        let title = title.to_string();

        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE threads SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now(), thread_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_thread(&self, thread_id: &str) -> StoreResult<()> {
        let thread_id = thread_id.to_string();

        self.execute(move |conn| {
            conn.execute("DELETE FROM threads WHERE id = ?1", params![thread_id])?;
            Ok(())
        })
        .await
    }
}
