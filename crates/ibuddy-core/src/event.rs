//! Inbound events, already converted from the transport's own types.

use crate::model::UserId;

/// Apparent author of an update
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Actor {
    /// Transport user id
    pub id: UserId,
    /// Handle without `@`
    pub username: Option<String>,
    /// IETF language tag reported by the client
    pub language_code: Option<String>,
    /// Whether the actor is a bot account
    pub is_bot: bool,
}

/// Voice or audio attachment reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAttachment {
    /// Transport file id
    pub file_id: String,
}

/// An ordinary message or command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncomingMessage {
    /// Conversation the message arrived in
    pub chat_id: i64,
    /// Transport message id
    pub message_id: i32,
    /// Sender
    pub from: Actor,
    /// Sender of the message this one replies to
    pub reply_to_from: Option<Actor>,
    /// Text or caption
    pub text: Option<String>,
    /// Voice/audio payload
    pub audio: Option<AudioAttachment>,
    /// Service notice announcing a pinned message
    pub is_pinned_service: bool,
}

/// A button press
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncomingCallback {
    /// Callback id used for acknowledgement
    pub id: String,
    /// Presser
    pub from: Actor,
    /// Button payload
    pub data: String,
    /// Conversation of the message carrying the button
    pub chat_id: Option<i64>,
    /// Message carrying the button
    pub message_id: Option<i32>,
    /// Sender of the message the button message replies to
    pub reply_to_from: Option<Actor>,
}

/// Any update the pipeline handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Message or command
    Message(IncomingMessage),
    /// Button press
    Callback(IncomingCallback),
}

impl InboundEvent {
    /// Apparent author
    #[must_use]
    pub const fn actor(&self) -> &Actor {
        match self {
            Self::Message(m) => &m.from,
            Self::Callback(c) => &c.from,
        }
    }

    /// Author of the replied-to message, if any
    #[must_use]
    pub const fn reply_to_from(&self) -> Option<&Actor> {
        match self {
            Self::Message(m) => m.reply_to_from.as_ref(),
            Self::Callback(c) => c.reply_to_from.as_ref(),
        }
    }

    /// Conversation to answer in
    #[must_use]
    pub const fn chat_id(&self) -> Option<i64> {
        match self {
            Self::Message(m) => Some(m.chat_id),
            Self::Callback(c) => c.chat_id,
        }
    }

    /// Message to reply to, for messages only
    #[must_use]
    pub const fn reply_target(&self) -> Option<i32> {
        match self {
            Self::Message(m) => Some(m.message_id),
            Self::Callback(_) => None,
        }
    }

    /// Short kind name for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Callback(_) => "callback",
        }
    }
}
