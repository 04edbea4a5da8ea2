//! Process-local storage backend.

use super::{newest_first, sort_chats, StorageError, StorageProvider};
use crate::model::{Chat, ChatId, Message, User, UserId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    users: BTreeMap<UserId, User>,
    chats: HashMap<ChatId, Chat>,
    messages: HashMap<ChatId, Vec<Message>>,
}

/// In-memory storage, lost on restart
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn get_or_create_user(&self, template: &User) -> Result<User, StorageError> {
        let mut state = self.state.write().await;
        Ok(state
            .users
            .entry(template.id)
            .or_insert_with(|| template.clone())
            .clone())
    }

    async fn create_user(&self, user: &User) -> Result<(), StorageError> {
        self.state.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), StorageError> {
        self.state.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        Ok(self.state.read().await.users.values().cloned().collect())
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<Chat>, StorageError> {
        Ok(self.state.read().await.chats.get(chat_id).cloned())
    }

    async fn create_chat(&self, chat: &Chat) -> Result<(), StorageError> {
        self.state
            .write()
            .await
            .chats
            .insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn list_user_chats(&self, user_id: UserId) -> Result<Vec<Chat>, StorageError> {
        let mut chats: Vec<Chat> = self
            .state
            .read()
            .await
            .chats
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        sort_chats(&mut chats);
        Ok(chats)
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, StorageError> {
        let mut chats: Vec<Chat> = self.state.read().await.chats.values().cloned().collect();
        sort_chats(&mut chats);
        Ok(chats)
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        self.state
            .write()
            .await
            .messages
            .entry(message.chat_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_chat_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .messages
            .get(chat_id)
            .map(|log| newest_first(log, limit))
            .unwrap_or_default())
    }

    async fn check_connection(&self) -> Result<(), String> {
        Ok(())
    }
}
