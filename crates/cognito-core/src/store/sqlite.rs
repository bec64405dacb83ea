use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::debug;

use super::{ChatStore, StoreResult};
use crate::state::{Chat, Message};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    messages    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chats_created_at ON chats(created_at);
";

/// SQLite-backed chat store. Messages are kept as a JSON column so a put
/// overwrites the full record in one statement.
#[derive(Clone)]
pub struct SqliteChatStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChatStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "Opening chat store");
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// `<data_local_dir>/cognito/chats.db`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("cognito").join("chats.db"))
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking database call off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn load_all(&self) -> StoreResult<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, messages FROM chats ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, title, created_at, messages)| -> StoreResult<Chat> {
                    let messages: Vec<Message> = serde_json::from_str(&messages)?;
                    Ok(Chat {
                        id,
                        title,
                        created_at,
                        messages,
                    })
                })
                .collect()
        })
        .await
    }

    async fn put(&self, chat: &Chat) -> StoreResult<()> {
        let messages = serde_json::to_string(&chat.messages)?;
        let id = chat.id.clone();
        let title = chat.title.clone();
        let created_at = chat.created_at;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chats (id, title, created_at, messages) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    created_at = excluded.created_at,
                    messages = excluded.messages",
                params![id, title, created_at, messages],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM chats", [])?;
            Ok(())
        })
        .await
    }
}
