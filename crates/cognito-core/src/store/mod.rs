//! Local chat store: full chat records keyed by chat id

pub mod error;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::state::Chat;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryChatStore;
pub use sqlite::SqliteChatStore;

/// Key-value persistence for chats.
///
/// `put` is an idempotent last-write-wins overwrite of the whole record.
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// All chats, newest first
    async fn load_all(&self) -> StoreResult<Vec<Chat>>;

    async fn put(&self, chat: &Chat) -> StoreResult<()>;

    async fn delete_one(&self, id: &str) -> StoreResult<()>;

    async fn delete_all(&self) -> StoreResult<()>;
}
