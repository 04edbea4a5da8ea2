//! Persisted records: users, chat threads and messages.

use crate::config::EMPTY_TITLE_PLACEHOLDER;
use crate::l10n::Lang;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable transport-level user id
pub type UserId = i64;

/// Opaque chat thread id, rendered as 32 lowercase hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Generate a fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a hex-encoded id, normalizing case.
    ///
    /// Only the 32-digit simple form is accepted.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 32 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Uuid::try_parse(raw)
            .ok()
            .map(|id| Self(id.simple().to_string()))
    }

    /// Hex representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bot user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Transport user id
    pub id: UserId,
    /// Display handle, may be empty
    #[serde(default)]
    pub username: String,
    /// Chat that ordinary messages append to
    #[serde(default)]
    pub active_chat_id: Option<ChatId>,
    /// Presence means the user is banned
    #[serde(default)]
    pub ban_reason: Option<String>,
    /// Backend model override
    #[serde(default)]
    pub model: Option<String>,
    /// Completion length override
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sender locale of the current update, never persisted
    #[serde(skip)]
    pub lang: Lang,
    /// Privilege of the current update, never persisted
    #[serde(skip)]
    pub is_admin: bool,
}

impl User {
    /// Create a user with no active chat and no overrides
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            active_chat_id: None,
            ban_reason: None,
            model: None,
            max_tokens: None,
            lang: Lang::default(),
            is_admin: false,
        }
    }

    /// Whether the user is currently banned
    #[must_use]
    pub fn is_banned(&self) -> bool {
        self.ban_reason.is_some()
    }

    /// Handle for listings, falling back to the numeric id
    #[must_use]
    pub fn display_handle(&self) -> String {
        if self.username.is_empty() {
            self.id.to_string()
        } else {
            self.username.clone()
        }
    }
}

/// A conversation thread owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Thread id
    pub id: ChatId,
    /// Owner id
    pub user_id: UserId,
    /// Owner handle at creation time
    #[serde(default)]
    pub username: String,
    /// Label, taken from the first message
    #[serde(default)]
    pub title: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Chat {
    /// Start a new thread for `owner`
    #[must_use]
    pub fn new(owner: &User, title: impl Into<String>) -> Self {
        Self {
            id: ChatId::generate(),
            user_id: owner.id,
            username: owner.username.clone(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }

    /// Title, or a placeholder when empty
    #[must_use]
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            EMPTY_TITLE_PLACEHOLDER
        } else {
            &self.title
        }
    }

    /// Owner handle, falling back to the numeric id
    #[must_use]
    pub fn owner_label(&self) -> String {
        if self.username.is_empty() {
            self.user_id.to_string()
        } else {
            self.username.clone()
        }
    }
}

/// Author role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human turn
    User,
    /// Backend turn
    Assistant,
}

/// One stored turn of a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Transport message id of the delivered turn
    pub id: i32,
    /// Owning chat
    pub chat_id: ChatId,
    /// Message this one answers
    #[serde(default)]
    pub reply_to_id: Option<i32>,
    /// Author id
    pub user_id: UserId,
    /// Author handle
    #[serde(default)]
    pub username: String,
    /// Author role
    pub role: Role,
    /// Text body
    pub text: String,
    /// Raw backend response, kept for audit
    #[serde(default)]
    pub additional: Option<serde_json::Value>,
    /// Insertion time, used for ordering
    pub created_at: DateTime<Utc>,
}
