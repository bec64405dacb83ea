use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChatStore, StoreResult};
use crate::state::Chat;

/// In-memory chat store.
/// Useful for testing and for running without a data directory.
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    chats: Arc<Mutex<HashMap<String, Chat>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with the given chats
    pub fn with_chats(chats: impl IntoIterator<Item = Chat>) -> Self {
        let store = Self::new();
        {
            let mut map = store.chats.lock();
            for chat in chats {
                map.insert(chat.id.clone(), chat);
            }
        }
        store
    }

    pub fn get(&self, id: &str) -> Option<Chat> {
        self.chats.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.chats.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.lock().is_empty()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn load_all(&self) -> StoreResult<Vec<Chat>> {
        let mut result: Vec<Chat> = self.chats.lock().values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn put(&self, chat: &Chat) -> StoreResult<()> {
        self.chats.lock().insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn delete_one(&self, id: &str) -> StoreResult<()> {
        self.chats.lock().remove(id);
        Ok(())
    }

    async fn delete_all(&self) -> StoreResult<()> {
        self.chats.lock().clear();
        Ok(())
    }
}
