//! Outbound transport port.
//!
//! The pipeline talks to the messaging platform only through
//! [`ChatTransport`], so it can run against a recording fake in tests.

use crate::event::Actor;
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The requested markup could not be parsed by the platform
    #[error("Markup parse error: {0}")]
    MarkupParse(String),
    /// Any other delivery failure
    #[error("Delivery error: {0}")]
    Delivery(String),
}

/// Text formatting mode, richest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Markup {
    /// MarkdownV2
    Rich,
    /// Legacy Markdown
    Legacy,
    /// No formatting
    Plain,
}

impl Markup {
    /// Next plainer mode, `None` after [`Markup::Plain`]
    #[must_use]
    pub const fn degrade(self) -> Option<Self> {
        match self {
            Self::Rich => Some(Self::Legacy),
            Self::Legacy => Some(Self::Plain),
            Self::Plain => None,
        }
    }
}

/// Inline keyboard button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    /// Visible label
    pub label: String,
    /// Callback payload
    pub data: String,
}

impl InlineButton {
    /// Create a callback button
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Rows of inline buttons
pub type InlineKeyboard = Vec<Vec<InlineButton>>;

/// A text message to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingText {
    /// Destination conversation
    pub chat_id: i64,
    /// Body
    pub text: String,
    /// Formatting mode
    pub markup: Markup,
    /// Message to reply to
    pub reply_to: Option<i32>,
    /// Inline keyboard
    pub keyboard: Option<InlineKeyboard>,
    /// Hide the custom reply keyboard, ignored when `keyboard` is set
    pub remove_reply_keyboard: bool,
}

impl OutgoingText {
    /// Plain text to `chat_id`
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            markup: Markup::Plain,
            reply_to: None,
            keyboard: None,
            remove_reply_keyboard: false,
        }
    }

    /// Set the formatting mode
    #[must_use]
    pub const fn markup(mut self, markup: Markup) -> Self {
        self.markup = markup;
        self
    }

    /// Reply to a message
    #[must_use]
    pub const fn reply_to(mut self, message_id: Option<i32>) -> Self {
        self.reply_to = message_id;
        self
    }

    /// Attach an inline keyboard
    #[must_use]
    pub fn keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Hide the custom reply keyboard
    #[must_use]
    pub const fn remove_reply_keyboard(mut self) -> Self {
        self.remove_reply_keyboard = true;
        self
    }
}

/// Result of a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    /// Platform message id
    pub message_id: i32,
}

/// Messaging platform operations used by the pipeline
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Identity of the bot account
    fn bot_identity(&self) -> Actor;

    /// Send a text message
    async fn send_text(&self, message: OutgoingText) -> Result<SentMessage, TransportError>;

    /// Pin a message silently
    async fn pin_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    /// Unpin every pinned message of a conversation
    async fn unpin_all(&self, chat_id: i64) -> Result<(), TransportError>;

    /// Delete a message
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError>;

    /// Acknowledge a button press, optionally with a toast
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError>;

    /// Send remote images as one album
    async fn send_photos(
        &self,
        chat_id: i64,
        urls: Vec<String>,
        reply_to: Option<i32>,
    ) -> Result<(), TransportError>;

    /// Resolve a direct download URL for an attachment
    async fn file_download_url(&self, file_id: &str) -> Result<String, TransportError>;
}
