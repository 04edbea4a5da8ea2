//! Localized user-facing texts.
//!
//! Every key has an English entry; other languages may be partial. A lookup
//! that misses the requested language is logged and counted, then served in
//! English.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static MISSING_TRANSLATIONS: AtomicU64 = AtomicU64::new(0);

/// Supported interface languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lang {
    /// English, the default
    #[default]
    En,
    /// Russian
    Ru,
}

impl Lang {
    /// Map a transport language tag (`ru`, `ru-RU`, ...) to a language
    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.split(['-', '_']).next().unwrap_or_default().to_ascii_lowercase()) {
            Some(primary) if primary == "ru" => Self::Ru,
            _ => Self::En,
        }
    }

    /// ISO 639-1 code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ru => "ru",
        }
    }
}

/// Keys of localized texts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKey {
    /// Placeholder shown while an update is handled
    Loading,
    /// Ban notice, takes `{reason}`
    UserBanned,
    /// Message below the minimum length
    TooShortMessage,
    /// Reply to `/start`
    WelcomeMessage,
    /// Generic failure
    RetryLater,
    /// Unrecognized or unauthorized command
    UnknownCommand,
    /// Reply to `/new`
    NewContext,
    /// `/history` without an active chat
    NoActiveChat,
    /// Empty chat listing
    NoChats,
    /// Header of the chat switcher
    SwitchChatPrompt,
    /// `/image` prompt below the minimum length
    ImagePromptTooShort,
    /// Backend context overflow
    UseNewCommand,
    /// Chat switch target missing
    ChatNotFound,
    /// Chat switch confirmation, takes `{title}`
    ActiveChat,
    /// `/history` header, takes `{count}`
    HistoryHeader,
    /// `/history` on a chat without messages
    EmptyHistory,
    /// `/history` label of user turns
    HistoryUserLabel,
    /// Label of assistant turns
    AssistantLabel,
    /// Label of a transcribed voice message
    VoiceTextLabel,
    /// Malformed button payload
    InvalidIdentifier,
}

const fn english(key: TextKey) -> &'static str {
    match key {
        TextKey::Loading => "Loading...",
        TextKey::UserBanned => "You're banned: {reason}",
        TextKey::TooShortMessage => "Too short message",
        TextKey::WelcomeMessage => "Welcome!\nSend message to start conversation\nSend `/new` to clear current thread\nSend `/image {description}` to generate images",
        TextKey::RetryLater => "Failed, try again",
        TextKey::UnknownCommand => "Unknown command",
        TextKey::NewContext => "New context started",
        TextKey::NoActiveChat => "There is no active chat",
        TextKey::NoChats => "No chats found",
        TextKey::SwitchChatPrompt => "Click on chat you want to switch",
        TextKey::ImagePromptTooShort => "Please write more information",
        TextKey::UseNewCommand => "Start new context with /new command",
        TextKey::ChatNotFound => "Chat not found",
        TextKey::ActiveChat => "Active chat: {title}",
        TextKey::HistoryHeader => "Last {count} messages:",
        TextKey::EmptyHistory => "No messages yet",
        TextKey::HistoryUserLabel => "Your message",
        TextKey::AssistantLabel => "Assistant's answer",
        TextKey::VoiceTextLabel => "voice text",
        TextKey::InvalidIdentifier => "Invalid identifier",
    }
}

const fn russian(key: TextKey) -> Option<&'static str> {
    Some(match key {
        TextKey::Loading => "Идет загрузка...",
        TextKey::UserBanned => "Вы были забанены: {reason}",
        TextKey::TooShortMessage => "Слишком короткое сообщение",
        TextKey::WelcomeMessage => "Добро пожаловать!\nОтправьте сообщение, чтобы начать диалог\nОтправьте `/new`, чтобы начать новую ветку\nОтправьте `/image {описание}`, чтобы сгенерировать изображения",
        TextKey::RetryLater => "Не получилось, попробуйте еще раз",
        TextKey::UnknownCommand => "Неизвестная команда",
        TextKey::NewContext => "Начат новый контекст",
        TextKey::NoActiveChat => "Нет активного чата",
        TextKey::NoChats => "Чаты не найдены",
        TextKey::SwitchChatPrompt => "Выберите чат, на который хотите переключиться",
        TextKey::ImagePromptTooShort => "Пожалуйста, опишите подробнее",
        TextKey::UseNewCommand => "Начните новый контекст командой /new",
        TextKey::ChatNotFound => "Чат не найден",
        TextKey::ActiveChat => "Активный чат: {title}",
        TextKey::EmptyHistory => "Сообщений пока нет",
        TextKey::HistoryUserLabel => "Ваше сообщение",
        TextKey::AssistantLabel => "Ответ ассистента",
        TextKey::HistoryHeader | TextKey::VoiceTextLabel | TextKey::InvalidIdentifier => {
            return None
        }
    })
}

/// Look up `key` in `lang`, falling back to English.
#[must_use]
pub fn text(lang: Lang, key: TextKey) -> &'static str {
    let translated = match lang {
        Lang::En => return english(key),
        Lang::Ru => russian(key),
    };
    translated.unwrap_or_else(|| {
        MISSING_TRANSLATIONS.fetch_add(1, Ordering::Relaxed);
        warn!(lang = lang.code(), key = ?key, "Missing translation, using English");
        english(key)
    })
}

/// Look up `key` and substitute `{name}` placeholders.
#[must_use]
pub fn format(lang: Lang, key: TextKey, args: &[(&str, &str)]) -> String {
    args.iter()
        .fold(text(lang, key).to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
}

/// Number of lookups served by the English fallback since start
#[must_use]
pub fn missing_translations() -> u64 {
    MISSING_TRANSLATIONS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lang_from_tag() {
        assert_eq!(Lang::from_tag(Some("ru")), Lang::Ru);
        assert_eq!(Lang::from_tag(Some("ru-RU")), Lang::Ru);
        assert_eq!(Lang::from_tag(Some("RU")), Lang::Ru);
        assert_eq!(Lang::from_tag(Some("en-US")), Lang::En);
        assert_eq!(Lang::from_tag(Some("de")), Lang::En);
        assert_eq!(Lang::from_tag(None), Lang::En);
    }

    #[test]
    fn test_russian_lookup() {
        assert_eq!(text(Lang::Ru, TextKey::Loading), "Идет загрузка...");
    }

    #[test]
    fn test_missing_translation_falls_back_and_is_counted() {
        let before = missing_translations();
        assert_eq!(
            text(Lang::Ru, TextKey::InvalidIdentifier),
            "Invalid identifier"
        );
        assert!(missing_translations() > before);
    }

    #[test]
    fn test_format_substitutes_placeholders() {
        assert_eq!(
            format(Lang::En, TextKey::UserBanned, &[("reason", "spam")]),
            "You're banned: spam"
        );
        assert_eq!(
            format(Lang::Ru, TextKey::ActiveChat, &[("title", "Рецепты")]),
            "Активный чат: Рецепты"
        );
    }

    #[test]
    fn test_welcome_keeps_literal_braces() {
        // `{description}` is part of the text, not a placeholder
        assert!(format(Lang::En, TextKey::WelcomeMessage, &[]).contains("{description}"));
    }
}
