//! Bot API implementation of [`ChatTransport`].

use async_trait::async_trait;
use ibuddy_core::event::Actor;
use ibuddy_core::transport::{
    ChatTransport, InlineKeyboard, Markup, OutgoingText, SentMessage, TransportError,
};
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile,
    InputMedia, InputMediaPhoto, KeyboardRemove, MessageId, ParseMode, ReplyParameters,
};
use teloxide::RequestError;
use tracing::debug;

const ERROR_CANT_PARSE: &str = "can't parse entities";

/// Telegram transport bound to one bot account
pub struct TelegramTransport {
    bot: Bot,
    identity: Actor,
}

/// Map a Bot API failure onto the transport error kinds.
///
/// Markup rejections are reported as `MarkupParse` so the renderer can
/// degrade; everything else is a delivery failure.
#[must_use]
pub fn classify_error(err: &RequestError) -> TransportError {
    let text = err.to_string();
    if text.to_lowercase().contains(ERROR_CANT_PARSE) {
        TransportError::MarkupParse(text)
    } else {
        TransportError::Delivery(text)
    }
}

/// Bot API parse mode of a markup level
#[must_use]
#[allow(deprecated)]
pub const fn parse_mode(markup: Markup) -> Option<ParseMode> {
    match markup {
        Markup::Rich => Some(ParseMode::MarkdownV2),
        Markup::Legacy => Some(ParseMode::Markdown),
        Markup::Plain => None,
    }
}

fn inline_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.into_iter().map(|row| {
        row.into_iter()
            .map(|b| InlineKeyboardButton::callback(b.label, b.data))
            .collect::<Vec<_>>()
    }))
}

fn delivery(err: impl std::fmt::Display) -> TransportError {
    TransportError::Delivery(err.to_string())
}

impl TelegramTransport {
    /// Wrap a bot whose identity was fetched with `get_me`
    #[must_use]
    pub const fn new(bot: Bot, identity: Actor) -> Self {
        Self { bot, identity }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn bot_identity(&self) -> Actor {
        self.identity.clone()
    }

    async fn send_text(&self, message: OutgoingText) -> Result<SentMessage, TransportError> {
        let mut req = self.bot.send_message(ChatId(message.chat_id), message.text);
        if let Some(mode) = parse_mode(message.markup) {
            req = req.parse_mode(mode);
        }
        if let Some(reply_to) = message.reply_to {
            req = req.reply_parameters(
                ReplyParameters::new(MessageId(reply_to)).allow_sending_without_reply(),
            );
        }
        if let Some(keyboard) = message.keyboard {
            req = req.reply_markup(inline_markup(keyboard));
        } else if message.remove_reply_keyboard {
            req = req.reply_markup(KeyboardRemove::new());
        }

        let sent = req.await.map_err(|e| classify_error(&e))?;
        Ok(SentMessage {
            message_id: sent.id.0,
        })
    }

    async fn pin_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .pin_chat_message(ChatId(chat_id), MessageId(message_id))
            .disable_notification(true)
            .await
            .map_err(|e| classify_error(&e))?;
        Ok(())
    }

    async fn unpin_all(&self, chat_id: i64) -> Result<(), TransportError> {
        self.bot
            .unpin_all_chat_messages(ChatId(chat_id))
            .await
            .map_err(|e| classify_error(&e))?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map_err(|e| classify_error(&e))?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError> {
        let mut req = self
            .bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()));
        if let Some(text) = text {
            req = req.text(text);
        }
        req.await.map_err(|e| classify_error(&e))?;
        Ok(())
    }

    async fn send_photos(
        &self,
        chat_id: i64,
        urls: Vec<String>,
        reply_to: Option<i32>,
    ) -> Result<(), TransportError> {
        let media = urls
            .iter()
            .map(|url| {
                reqwest::Url::parse(url)
                    .map(|url| InputMedia::Photo(InputMediaPhoto::new(InputFile::url(url))))
                    .map_err(delivery)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if media.is_empty() {
            return Ok(());
        }

        let mut req = self.bot.send_media_group(ChatId(chat_id), media);
        if let Some(reply_to) = reply_to {
            req = req.reply_parameters(
                ReplyParameters::new(MessageId(reply_to)).allow_sending_without_reply(),
            );
        }
        req.await.map_err(|e| classify_error(&e))?;
        Ok(())
    }

    async fn file_download_url(&self, file_id: &str) -> Result<String, TransportError> {
        // Retried by the caller
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| classify_error(&e))?;

        let url = self
            .bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), file.path))
            .map_err(delivery)?;
        debug!(file_id, "Resolved file path");
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::ApiError;

    #[test]
    fn test_markup_rejection_is_classified() {
        let err = RequestError::Api(ApiError::Unknown(
            "Bad Request: can't parse entities: Character '.' is reserved".to_string(),
        ));
        assert!(matches!(
            classify_error(&err),
            TransportError::MarkupParse(_)
        ));
    }

    #[test]
    fn test_other_errors_are_delivery_failures() {
        let err = RequestError::Api(ApiError::BotBlocked);
        assert!(matches!(classify_error(&err), TransportError::Delivery(_)));
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!(parse_mode(Markup::Rich), Some(ParseMode::MarkdownV2));
        assert_eq!(parse_mode(Markup::Plain), None);
        assert!(parse_mode(Markup::Legacy).is_some());
    }

    #[test]
    fn test_inline_markup_keeps_rows() {
        use ibuddy_core::transport::InlineButton;

        let markup = inline_markup(vec![
            vec![
                InlineButton::new("alice", "admin:user_chats:1"),
                InlineButton::new("[ban]", "admin:user_ban:1"),
            ],
            vec![InlineButton::new("next »", "admin:users_page:1")],
        ]);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "next »");
    }
}
