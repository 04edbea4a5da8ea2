//! Telegram update → core event conversion.

use ibuddy_core::event::{Actor, AudioAttachment, IncomingCallback, IncomingMessage};
use teloxide::types::{CallbackQuery, Message, User};

/// Core view of a Telegram user
#[must_use]
pub fn actor(user: &User) -> Actor {
    Actor {
        id: user.id.0.cast_signed(),
        username: user.username.clone(),
        language_code: user.language_code.clone(),
        is_bot: user.is_bot,
    }
}

fn replied_author(msg: &Message) -> Option<Actor> {
    msg.reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .map(actor)
}

/// Convert a message update.
///
/// Returns `None` for messages without a sender (channel posts).
#[must_use]
pub fn message(msg: &Message) -> Option<IncomingMessage> {
    let from = msg.from.as_ref()?;
    let audio = msg
        .voice()
        .map(|v| v.file.id.0.clone())
        .or_else(|| msg.audio().map(|a| a.file.id.0.clone()))
        .map(|file_id| AudioAttachment { file_id });

    Some(IncomingMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        from: actor(from),
        reply_to_from: replied_author(msg),
        text: msg.text().or_else(|| msg.caption()).map(str::to_string),
        audio,
        is_pinned_service: msg.pinned_message().is_some(),
    })
}

/// Convert a callback query
#[must_use]
pub fn callback(q: &CallbackQuery) -> IncomingCallback {
    let carrier = q.message.as_ref();
    IncomingCallback {
        id: q.id.0.clone(),
        from: actor(&q.from),
        data: q.data.clone().unwrap_or_default(),
        chat_id: carrier.map(|m| m.chat().id.0),
        message_id: carrier.map(|m| m.id().0),
        reply_to_from: q.regular_message().and_then(replied_author),
    }
}
