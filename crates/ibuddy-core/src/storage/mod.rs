//! Storage layer for users, chat threads and messages
//!
//! [`StorageProvider`] is the only mutable state shared between workers.
//! User and chat records are replaced whole without version checks, so
//! concurrent writers to the same record can lose updates. Messages and
//! chat ownership are append-only and never lost to a concurrent write.

mod memory;
mod r2;

pub use memory::MemoryStorage;
pub use r2::R2Storage;

use crate::config::{Settings, StorageBackend};
use crate::model::{Chat, ChatId, Message, User, UserId};
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error retrieving object from S3
    #[error("S3 Get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error listing objects in S3
    #[error("S3 list error: {0}")]
    S3List(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Interface for storage providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get a user by id
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StorageError>;
    /// Return the stored user, creating it from `template` when absent
    async fn get_or_create_user(&self, template: &User) -> Result<User, StorageError>;
    /// Insert a new user
    async fn create_user(&self, user: &User) -> Result<(), StorageError>;
    /// Replace a stored user
    async fn update_user(&self, user: &User) -> Result<(), StorageError>;
    /// All users ordered by id
    async fn list_users(&self) -> Result<Vec<User>, StorageError>;
    /// Get a chat by id
    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<Chat>, StorageError>;
    /// Insert a new chat
    async fn create_chat(&self, chat: &Chat) -> Result<(), StorageError>;
    /// Chats owned by a user, newest first
    async fn list_user_chats(&self, user_id: UserId) -> Result<Vec<Chat>, StorageError>;
    /// Chats of all users, newest first
    async fn list_chats(&self) -> Result<Vec<Chat>, StorageError>;
    /// Append a message
    async fn insert_message(&self, message: &Message) -> Result<(), StorageError>;
    /// Up to `limit` most recently inserted messages of a chat, newest first
    async fn list_chat_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// Build the backend selected in settings.
///
/// # Errors
///
/// Returns an error if the R2 backend is selected but not configured.
pub async fn from_settings(settings: &Settings) -> Result<Arc<dyn StorageProvider>, StorageError> {
    Ok(match settings.storage_backend {
        StorageBackend::R2 => Arc::new(R2Storage::new(settings).await?),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    })
}

/// Newest-first tail of an insertion-ordered log
fn newest_first(messages: &[Message], limit: usize) -> Vec<Message> {
    messages.iter().rev().take(limit).cloned().collect()
}

/// Sort chats newest first, ties broken by id for a stable order
fn sort_chats(chats: &mut [Chat]) {
    chats.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
