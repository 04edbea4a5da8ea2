//! Cloudflare R2 / AWS S3 backend.
//!
//! Records are JSON documents:
//! `users/{id}/profile.json`, `users/{id}/chats/{chat_id}.json` (ownership
//! marker), `chats/{chat_id}/chat.json` and one object per message under
//! `chats/{chat_id}/messages/`.
//!
//! Message keys start with the inverted creation time, so a plain listing
//! returns the newest messages first. Markers and messages are written once
//! and never rewritten.

use super::{sort_chats, StorageError, StorageProvider};
use crate::config::Settings;
use crate::model::{Chat, ChatId, Message, User, UserId};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

fn user_profile_key(user_id: UserId) -> String {
    format!("users/{user_id}/profile.json")
}

fn user_chats_prefix(user_id: UserId) -> String {
    format!("users/{user_id}/chats/")
}

fn user_chat_key(user_id: UserId, chat_id: &ChatId) -> String {
    format!("{}{chat_id}.json", user_chats_prefix(user_id))
}

/// Chat id of an ownership marker key
fn chat_id_from_marker(key: &str) -> Option<ChatId> {
    let name = key.rsplit('/').next()?;
    ChatId::parse(name.strip_suffix(".json")?)
}

fn chat_key(chat_id: &ChatId) -> String {
    format!("chats/{chat_id}/chat.json")
}

fn chat_messages_prefix(chat_id: &ChatId) -> String {
    format!("chats/{chat_id}/messages/")
}

/// Message object key; lexicographic order is newest first.
///
/// Equal timestamps fall back to the inverted transport id, and the
/// nonce keeps concurrent inserts from overwriting each other.
fn chat_message_key(message: &Message, nonce: &str) -> String {
    let inverted_ts = i64::MAX.saturating_sub(message.created_at.timestamp_micros().max(0));
    let inverted_id = i64::from(i32::MAX) - i64::from(message.id.max(0));
    format!(
        "{}{inverted_ts:019}-{inverted_id:010}-{nonce}.json",
        chat_messages_prefix(&message.chat_id)
    )
}

// ListObjectsV2 never returns more than this per page
const MAX_LIST_KEYS: usize = 1000;

/// R2-backed storage implementation
pub struct R2Storage {
    client: Client,
    bucket: String,
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl R2Storage {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60 * 60))
            .time_to_idle(Duration::from_secs(30 * 60))
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
            cache,
        })
    }

    async fn save_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        data: &T,
    ) -> Result<(), StorageError> {
        let body_bytes = serde_json::to_vec_pretty(data)?;

        // Write-through
        self.cache
            .insert(key.to_string(), Arc::new(body_bytes.clone()))
            .await;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body_bytes))
            .content_type("application/json")
            .send()
            .await;

        if let Err(e) = result {
            // The cache must not serve a write S3 never saw
            self.cache.invalidate(key).await;
            return Err(StorageError::S3Put(e.to_string()));
        }

        Ok(())
    }

    async fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        if let Some(cached) = self.cache.get(key).await {
            match serde_json::from_slice(&cached) {
                Ok(data) => return Ok(Some(data)),
                Err(e) => {
                    warn!(key, error = %e, "Cache deserialization failed");
                    self.cache.invalidate(key).await;
                }
            }
        }

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
                    .into_bytes();

                self.cache
                    .insert(key.to_string(), Arc::new(data.to_vec()))
                    .await;

                Ok(Some(serde_json::from_slice(&data)?))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }

    /// Keys under `prefix` ending with `suffix`, following continuation tokens
    async fn list_keys(&self, prefix: &str, suffix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::S3List(e.to_string()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter(|key| key.ends_with(suffix))
                    .map(ToString::to_string),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(prefix, count = keys.len(), "Listed storage keys");
        Ok(keys)
    }

    /// First `limit` keys under `prefix` in key order, one request
    async fn list_first_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>, StorageError> {
        let max_keys = i32::try_from(limit.min(MAX_LIST_KEYS)).unwrap_or(i32::MAX);
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| StorageError::S3List(e.to_string()))?;

        Ok(output
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .take(limit)
            .map(ToString::to_string)
            .collect())
    }

    /// Direct child "directories" of `prefix`, following continuation tokens
    async fn list_child_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut prefixes = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::S3List(e.to_string()))?;

            prefixes.extend(
                output
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .map(ToString::to_string),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(prefixes)
    }

    async fn load_all<T: serde::de::DeserializeOwned>(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<T>, StorageError> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.load_json(&key).await? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl StorageProvider for R2Storage {
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StorageError> {
        self.load_json(&user_profile_key(user_id)).await
    }

    async fn get_or_create_user(&self, template: &User) -> Result<User, StorageError> {
        if let Some(user) = self.get_user(template.id).await? {
            return Ok(user);
        }
        self.create_user(template).await?;
        info!(user_id = template.id, "Created user");
        Ok(template.clone())
    }

    async fn create_user(&self, user: &User) -> Result<(), StorageError> {
        self.save_json(&user_profile_key(user.id), user).await
    }

    async fn update_user(&self, user: &User) -> Result<(), StorageError> {
        self.save_json(&user_profile_key(user.id), user).await
    }

    async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let keys = self
            .list_child_prefixes("users/")
            .await?
            .into_iter()
            .map(|dir| format!("{dir}profile.json"))
            .collect();
        let mut users: Vec<User> = self.load_all(keys).await?;
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<Chat>, StorageError> {
        self.load_json(&chat_key(chat_id)).await
    }

    async fn create_chat(&self, chat: &Chat) -> Result<(), StorageError> {
        self.save_json(&chat_key(&chat.id), chat).await?;
        self.save_json(&user_chat_key(chat.user_id, &chat.id), &chat.id)
            .await
    }

    async fn list_user_chats(&self, user_id: UserId) -> Result<Vec<Chat>, StorageError> {
        let keys = self
            .list_keys(&user_chats_prefix(user_id), ".json")
            .await?
            .iter()
            .filter_map(|key| chat_id_from_marker(key))
            .map(|id| chat_key(&id))
            .collect();
        let mut chats: Vec<Chat> = self.load_all(keys).await?;
        sort_chats(&mut chats);
        Ok(chats)
    }

    async fn list_chats(&self) -> Result<Vec<Chat>, StorageError> {
        let keys = self
            .list_child_prefixes("chats/")
            .await?
            .into_iter()
            .map(|dir| format!("{dir}chat.json"))
            .collect();
        let mut chats: Vec<Chat> = self.load_all(keys).await?;
        sort_chats(&mut chats);
        Ok(chats)
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        let nonce = Uuid::new_v4().simple().to_string();
        self.save_json(&chat_message_key(message, &nonce), message)
            .await
    }

    async fn list_chat_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let keys = self
            .list_first_keys(&chat_messages_prefix(chat_id), limit)
            .await?;
        self.load_all(keys).await
    }

    async fn check_connection(&self) -> Result<(), String> {
        match self.client.list_buckets().send().await {
            Ok(_) => {
                info!("Successfully connected to R2 storage.");
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to R2: {:?}", e);
                Err(format!("{e:?}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use chrono::{TimeZone, Utc};

    fn chat() -> ChatId {
        ChatId::parse("00112233445566778899aabbccddeeff").expect("valid id")
    }

    fn message_at(secs: i64, id: i32) -> Message {
        Message {
            id,
            chat_id: chat(),
            reply_to_id: None,
            user_id: 42,
            username: "alice".to_string(),
            role: Role::User,
            text: "hi".to_string(),
            additional: None,
            created_at: Utc.timestamp_opt(secs, 0).single().expect("valid time"),
        }
    }

    #[test]
    fn test_key_layout() {
        let chat = chat();
        assert_eq!(user_profile_key(42), "users/42/profile.json");
        assert_eq!(
            user_chat_key(-7, &chat),
            "users/-7/chats/00112233445566778899aabbccddeeff.json"
        );
        assert_eq!(
            chat_key(&chat),
            "chats/00112233445566778899aabbccddeeff/chat.json"
        );
        assert!(chat_message_key(&message_at(1_700_000_000, 5), "n")
            .starts_with("chats/00112233445566778899aabbccddeeff/messages/"));
    }

    #[test]
    fn test_marker_key_yields_chat_id() {
        let key = user_chat_key(1, &chat());
        assert_eq!(chat_id_from_marker(&key), Some(chat()));
        assert_eq!(chat_id_from_marker("users/1/chats/garbage.json"), None);
        assert_eq!(chat_id_from_marker("users/1/profile.json"), None);
    }

    #[test]
    fn test_message_keys_sort_newest_first() {
        let older = chat_message_key(&message_at(1_700_000_000, 10), "a");
        let newer = chat_message_key(&message_at(1_700_000_001, 11), "a");
        let much_newer = chat_message_key(&message_at(2_000_000_000, 0), "a");
        let mut keys = vec![older.clone(), much_newer.clone(), newer.clone()];
        keys.sort();
        assert_eq!(keys, vec![much_newer, newer, older]);
    }

    #[test]
    fn test_same_instant_orders_by_transport_id() {
        let user_turn = chat_message_key(&message_at(1_700_000_000, 10), "z");
        let reply = chat_message_key(&message_at(1_700_000_000, 11), "a");
        assert!(reply < user_turn);
    }

    #[test]
    fn test_concurrent_inserts_get_distinct_keys() {
        let message = message_at(1_700_000_000, 10);
        assert_ne!(
            chat_message_key(&message, "first"),
            chat_message_key(&message, "second")
        );
    }

    #[test]
    fn test_profile_suffix_does_not_match_chat_marker() {
        assert!(!user_chat_key(1, &chat()).ends_with("/profile.json"));
        assert!(user_profile_key(1).ends_with("/profile.json"));
    }
}
