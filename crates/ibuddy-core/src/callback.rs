//! Callback payload protocol.
//!
//! Payloads are parsed once into [`CallbackAction`] and dispatched by
//! exhaustive matching. Admin payloads are `admin:<action>:<id>`; a bare
//! chat id switches the active chat.

use crate::model::{ChatId, UserId};
use thiserror::Error;

/// Reserved namespace of admin payloads
pub const ADMIN_NAMESPACE: &str = "admin";

/// Errors while parsing a callback payload
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallbackParseError {
    /// Admin namespace with an action nobody handles
    #[error("unknown admin action: {0}")]
    UnknownAdminAction(String),
    /// Known action whose identifier does not parse
    #[error("malformed identifier {value:?} for {action}")]
    MalformedId {
        /// Action name
        action: &'static str,
        /// Offending suffix
        value: String,
    },
    /// Neither an admin payload nor a chat id
    #[error("unrecognized payload: {0}")]
    Unrecognized(String),
}

/// Admin panel actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    /// List chats of a user
    UserChats(UserId),
    /// Show the transcript of a chat
    UserChat(ChatId),
    /// Ban a user
    Ban(UserId),
    /// Lift a ban
    Unban(UserId),
    /// Page of the user listing
    UsersPage(usize),
    /// Page of the chat listing
    ChatsPage(usize),
}

/// Parsed button payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Make the chat active
    SwitchChat(ChatId),
    /// Admin panel action
    Admin(AdminAction),
}

/// Whether a raw payload belongs to the admin namespace
#[must_use]
pub fn is_admin_namespace(data: &str) -> bool {
    data.split(':').next() == Some(ADMIN_NAMESPACE) && data.contains(':')
}

fn user_id(action: &'static str, raw: &str) -> Result<UserId, CallbackParseError> {
    raw.parse().map_err(|_| CallbackParseError::MalformedId {
        action,
        value: raw.to_string(),
    })
}

fn chat_id(action: &'static str, raw: &str) -> Result<ChatId, CallbackParseError> {
    ChatId::parse(raw).ok_or_else(|| CallbackParseError::MalformedId {
        action,
        value: raw.to_string(),
    })
}

fn page(action: &'static str, raw: &str) -> Result<usize, CallbackParseError> {
    raw.parse().map_err(|_| CallbackParseError::MalformedId {
        action,
        value: raw.to_string(),
    })
}

impl AdminAction {
    const USER_CHATS: &'static str = "user_chats";
    const USER_CHAT: &'static str = "user_chat";
    const USER_BAN: &'static str = "user_ban";
    const USER_UNBAN: &'static str = "user_unban";
    const USERS_PAGE: &'static str = "users_page";
    const CHATS_PAGE: &'static str = "chats_page";

    fn parse(action: &str, raw: &str) -> Result<Self, CallbackParseError> {
        match action {
            Self::USER_CHATS => user_id(Self::USER_CHATS, raw).map(Self::UserChats),
            Self::USER_CHAT => chat_id(Self::USER_CHAT, raw).map(Self::UserChat),
            Self::USER_BAN => user_id(Self::USER_BAN, raw).map(Self::Ban),
            Self::USER_UNBAN => user_id(Self::USER_UNBAN, raw).map(Self::Unban),
            Self::USERS_PAGE => page(Self::USERS_PAGE, raw).map(Self::UsersPage),
            Self::CHATS_PAGE => page(Self::CHATS_PAGE, raw).map(Self::ChatsPage),
            other => Err(CallbackParseError::UnknownAdminAction(other.to_string())),
        }
    }

    fn encode(&self) -> String {
        let (action, id) = match self {
            Self::UserChats(id) => (Self::USER_CHATS, id.to_string()),
            Self::UserChat(id) => (Self::USER_CHAT, id.to_string()),
            Self::Ban(id) => (Self::USER_BAN, id.to_string()),
            Self::Unban(id) => (Self::USER_UNBAN, id.to_string()),
            Self::UsersPage(n) => (Self::USERS_PAGE, n.to_string()),
            Self::ChatsPage(n) => (Self::CHATS_PAGE, n.to_string()),
        };
        format!("{ADMIN_NAMESPACE}:{action}:{id}")
    }
}

impl CallbackAction {
    /// Parse a raw payload.
    ///
    /// # Errors
    ///
    /// Returns a [`CallbackParseError`] describing why the payload is not
    /// actionable.
    pub fn parse(data: &str) -> Result<Self, CallbackParseError> {
        if is_admin_namespace(data) {
            let mut parts = data.splitn(3, ':').skip(1);
            let action = parts.next().unwrap_or_default();
            return match parts.next() {
                Some(raw) => AdminAction::parse(action, raw).map(Self::Admin),
                None => Err(CallbackParseError::UnknownAdminAction(action.to_string())),
            };
        }

        ChatId::parse(data)
            .map(Self::SwitchChat)
            .ok_or_else(|| CallbackParseError::Unrecognized(data.to_string()))
    }

    /// Encode into a button payload
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::SwitchChat(id) => id.to_string(),
            Self::Admin(action) => action.encode(),
        }
    }
}
