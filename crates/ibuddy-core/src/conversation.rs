//! Regular-user conversation handling.
//!
//! Owns the per-user active chat pointer: the first ordinary message from a
//! user without an active chat starts a thread, later messages append to
//! it, `/new` clears it and the chat switcher replaces it.

use crate::callback::CallbackAction;
use crate::command::Command;
use crate::config::{
    BACKEND_CONTEXT_WINDOW, HISTORY_DISPLAY_WINDOW, MIN_IMAGE_PROMPT_LEN, MIN_MESSAGE_LEN,
};
use crate::event::{IncomingCallback, IncomingMessage, InboundEvent};
use crate::history::recent_messages;
use crate::l10n::{self, Lang, TextKey};
use crate::llm::{self, CompletionRequest, ImageRequest, LlmError};
use crate::model::{Chat, ChatId, Message, Role, User};
use crate::pipeline::{PipelineError, Services};
use crate::render::Renderer;
use crate::transport::{InlineButton, Markup, OutgoingText, SentMessage};
use crate::utils::truncate_str;
use crate::voice::VoicePipeline;
use chrono::Utc;
use tracing::{debug, error, info, warn};

const BUTTON_LABEL_LEN: usize = 48;

/// Regular pipeline: ordinary messages, user commands and chat switching
pub struct ConversationHandler {
    services: Services,
    renderer: Renderer,
    voice: VoicePipeline,
    bot_username: Option<String>,
}

/// Render a `/history` transcript, oldest first
#[must_use]
pub fn format_history(messages: &[Message], lang: Lang) -> String {
    let body = messages
        .iter()
        .map(|m| match m.role {
            Role::User => format!(
                "*{}*:\n{}",
                l10n::text(lang, TextKey::HistoryUserLabel),
                m.text
            ),
            Role::Assistant => format!(
                "`{}`:\n{}",
                l10n::text(lang, TextKey::AssistantLabel),
                m.text
            ),
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    if messages.len() == HISTORY_DISPLAY_WINDOW {
        let header = l10n::format(
            lang,
            TextKey::HistoryHeader,
            &[("count", HISTORY_DISPLAY_WINDOW.to_string().as_str())],
        );
        format!("{header}\n\n{body}")
    } else {
        body
    }
}

impl ConversationHandler {
    /// Create the handler
    #[must_use]
    pub fn new(services: Services, voice: VoicePipeline) -> Self {
        let bot_username = services.transport.bot_identity().username;
        Self {
            renderer: Renderer::new(services.transport.clone()),
            services,
            voice,
            bot_username,
        }
    }

    /// Handle a regular event for `user`
    ///
    /// # Errors
    ///
    /// Returns an error only for failures that should abort the event
    /// silently; user-visible failures are reported in the chat instead.
    pub async fn handle(&self, event: &InboundEvent, user: User) -> Result<(), PipelineError> {
        match event {
            InboundEvent::Message(message) => self.handle_message(message, user).await,
            InboundEvent::Callback(callback) => self.handle_callback(callback, user).await,
        }
    }

    async fn handle_message(
        &self,
        message: &IncomingMessage,
        mut user: User,
    ) -> Result<(), PipelineError> {
        if message.is_pinned_service {
            debug!(chat_id = message.chat_id, "Ignoring pinned message notice");
            return Ok(());
        }

        let loading = self.send_loading(message, user.lang).await;

        let command = message
            .text
            .as_deref()
            .and_then(|t| Command::parse(t, self.bot_username.as_deref()));
        let result = match command {
            Some(command) => self.handle_command(message, &mut user, command).await,
            None => self.handle_turn(message, &mut user).await,
        };

        if let Some(loading) = loading {
            if let Err(e) = self
                .services
                .transport
                .delete_message(message.chat_id, loading.message_id)
                .await
            {
                debug!(error = %e, "Failed to delete loading message");
            }
        }
        result
    }

    async fn send_loading(&self, message: &IncomingMessage, lang: Lang) -> Option<SentMessage> {
        let text = format!("`{}`", l10n::text(lang, TextKey::Loading));
        self.renderer
            .send(
                OutgoingText::new(message.chat_id, text)
                    .markup(Markup::Legacy)
                    .reply_to(Some(message.message_id))
                    .remove_reply_keyboard(),
            )
            .await
            .ok()
    }

    async fn notify(&self, message: &IncomingMessage, lang: Lang, key: TextKey) {
        self.renderer
            .notify(
                message.chat_id,
                Some(message.message_id),
                l10n::text(lang, key),
            )
            .await;
    }

    async fn handle_turn(
        &self,
        message: &IncomingMessage,
        user: &mut User,
    ) -> Result<(), PipelineError> {
        let from_voice = message.audio.is_some();
        let raw = if from_voice {
            let transcript = self.voice.extract(message, user.lang).await;
            if transcript.is_empty() {
                return Ok(());
            }
            transcript
        } else {
            message.text.clone().unwrap_or_default()
        };

        let text = raw.trim();
        if text.chars().count() < MIN_MESSAGE_LEN {
            self.notify(message, user.lang, TextKey::TooShortMessage).await;
            return Ok(());
        }

        let chat_id = match user.active_chat_id.clone() {
            Some(id) => id,
            None => match self.start_chat(message, user, text).await {
                Some(id) => id,
                None => return Ok(()),
            },
        };

        let history = match recent_messages(
            self.services.storage.as_ref(),
            &chat_id,
            BACKEND_CONTEXT_WINDOW,
        )
        .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(user_id = user.id, %chat_id, error = %e, "Failed to load history");
                self.notify(message, user.lang, TextKey::RetryLater).await;
                return Ok(());
            }
        };

        let user_turn = Message {
            id: message.message_id,
            chat_id: chat_id.clone(),
            reply_to_id: None,
            user_id: user.id,
            username: user.username.clone(),
            role: Role::User,
            text: text.to_string(),
            additional: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.services.storage.insert_message(&user_turn).await {
            error!(user_id = user.id, %chat_id, error = %e, "Failed to store user message");
            self.notify(message, user.lang, TextKey::RetryLater).await;
            return Ok(());
        }

        self.answer(message, user, chat_id, text, &history, from_voice)
            .await;
        Ok(())
    }

    async fn start_chat(
        &self,
        message: &IncomingMessage,
        user: &mut User,
        title: &str,
    ) -> Option<ChatId> {
        let chat = Chat::new(user, title);
        if let Err(e) = self.services.storage.create_chat(&chat).await {
            error!(user_id = user.id, error = %e, "Failed to create chat");
            self.notify(message, user.lang, TextKey::RetryLater).await;
            return None;
        }

        user.active_chat_id = Some(chat.id.clone());
        if let Err(e) = self.services.storage.update_user(user).await {
            error!(user_id = user.id, error = %e, "Failed to activate new chat");
            self.notify(message, user.lang, TextKey::RetryLater).await;
            return None;
        }
        info!(user_id = user.id, chat_id = %chat.id, "Started new chat");

        if let Err(e) = self
            .services
            .transport
            .pin_message(message.chat_id, message.message_id)
            .await
        {
            warn!(chat_id = message.chat_id, error = %e, "Failed to pin thread anchor");
        }
        Some(chat.id)
    }

    async fn answer(
        &self,
        message: &IncomingMessage,
        user: &User,
        chat_id: ChatId,
        text: &str,
        history: &[Message],
        from_voice: bool,
    ) {
        let settings = &self.services.settings;
        let request = CompletionRequest {
            history: history
                .iter()
                .map(|m| llm::Message {
                    role: m.role,
                    content: m.text.clone(),
                })
                .collect(),
            user_message: text.to_string(),
            model_id: user
                .model
                .clone()
                .unwrap_or_else(|| settings.chat_model.clone()),
            max_tokens: user.max_tokens.unwrap_or(settings.default_max_tokens),
            end_user: user.id.to_string(),
        };

        let completion = match self.services.llm.chat_completion(request).await {
            Ok(completion) => completion,
            Err(LlmError::ContextLengthExceeded(e)) => {
                info!(user_id = user.id, %chat_id, error = %e, "Context window exhausted");
                self.notify(message, user.lang, TextKey::UseNewCommand).await;
                return;
            }
            Err(e) => {
                warn!(user_id = user.id, %chat_id, error = %e, "Chat completion failed");
                self.notify(message, user.lang, TextKey::RetryLater).await;
                return;
            }
        };

        let reply = if from_voice {
            format!(
                "*{}*:\n```\n{text}\n```\n\n{}",
                l10n::text(user.lang, TextKey::VoiceTextLabel),
                completion.content
            )
        } else {
            completion.content.clone()
        };

        let sent_id = match self
            .renderer
            .send(
                OutgoingText::new(message.chat_id, reply)
                    .markup(Markup::Rich)
                    .reply_to(Some(message.message_id)),
            )
            .await
        {
            Ok(sent) => sent.message_id,
            Err(e) => {
                warn!(user_id = user.id, %chat_id, error = %e, "Answer not delivered, storing anyway");
                0
            }
        };

        let bot = self.services.transport.bot_identity();
        let assistant_turn = Message {
            id: sent_id,
            chat_id,
            reply_to_id: Some(message.message_id),
            user_id: bot.id,
            username: bot.username.unwrap_or_default(),
            role: Role::Assistant,
            text: completion.content,
            additional: Some(completion.raw),
            created_at: Utc::now(),
        };
        if let Err(e) = self.services.storage.insert_message(&assistant_turn).await {
            error!(user_id = user.id, error = %e, "Failed to store assistant message");
        }
    }

    async fn handle_command(
        &self,
        message: &IncomingMessage,
        user: &mut User,
        command: Command,
    ) -> Result<(), PipelineError> {
        debug!(user_id = user.id, ?command, "User command");
        match command {
            Command::Start => {
                let _ = self
                    .renderer
                    .send(
                        OutgoingText::new(
                            message.chat_id,
                            l10n::text(user.lang, TextKey::WelcomeMessage),
                        )
                        .markup(Markup::Legacy)
                        .reply_to(Some(message.message_id)),
                    )
                    .await;
            }
            Command::New => self.reset_context(message, user).await,
            Command::Image(prompt) => self.generate_images(message, user, &prompt).await,
            Command::Chats => self.list_chats(message, user).await,
            Command::History => self.show_history(message, user).await,
            Command::Admin(_) | Command::Unknown(_) => {
                self.notify(message, user.lang, TextKey::UnknownCommand)
                    .await;
            }
        }
        Ok(())
    }

    async fn reset_context(&self, message: &IncomingMessage, user: &mut User) {
        user.active_chat_id = None;
        if let Err(e) = self.services.storage.update_user(user).await {
            error!(user_id = user.id, error = %e, "Failed to reset active chat");
            self.notify(message, user.lang, TextKey::RetryLater).await;
            return;
        }
        info!(user_id = user.id, "Active chat cleared");

        self.notify(message, user.lang, TextKey::NewContext).await;
        if let Err(e) = self.services.transport.unpin_all(message.chat_id).await {
            warn!(chat_id = message.chat_id, error = %e, "Failed to unpin thread anchors");
        }
    }

    async fn generate_images(&self, message: &IncomingMessage, user: &User, prompt: &str) {
        let prompt = prompt.trim();
        if prompt.chars().count() < MIN_IMAGE_PROMPT_LEN {
            self.notify(message, user.lang, TextKey::ImagePromptTooShort)
                .await;
            return;
        }

        let settings = &self.services.settings;
        let request = ImageRequest {
            prompt: prompt.to_string(),
            count: settings.image_count,
            size: settings.image_size.clone(),
            end_user: user.id.to_string(),
        };

        let urls = match self.services.llm.generate_images(request).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Image generation failed");
                self.notify(message, user.lang, TextKey::RetryLater).await;
                return;
            }
        };

        if let Err(e) = self
            .services
            .transport
            .send_photos(message.chat_id, urls, Some(message.message_id))
            .await
        {
            warn!(user_id = user.id, error = %e, "Failed to send images");
            self.notify(message, user.lang, TextKey::RetryLater).await;
        }
    }

    async fn list_chats(&self, message: &IncomingMessage, user: &User) {
        let chats = match self.services.storage.list_user_chats(user.id).await {
            Ok(chats) => chats,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Failed to list chats");
                self.notify(message, user.lang, TextKey::RetryLater).await;
                return;
            }
        };
        if chats.is_empty() {
            self.notify(message, user.lang, TextKey::NoChats).await;
            return;
        }

        let keyboard = chats
            .into_iter()
            .map(|chat| {
                let marker = if user.active_chat_id.as_ref() == Some(&chat.id) {
                    "» "
                } else {
                    ""
                };
                let label = format!(
                    "{marker}{}",
                    truncate_str(chat.display_title(), BUTTON_LABEL_LEN)
                );
                vec![InlineButton::new(
                    label,
                    CallbackAction::SwitchChat(chat.id).encode(),
                )]
            })
            .collect();

        let _ = self
            .renderer
            .send(
                OutgoingText::new(
                    message.chat_id,
                    l10n::text(user.lang, TextKey::SwitchChatPrompt),
                )
                .reply_to(Some(message.message_id))
                .keyboard(keyboard),
            )
            .await;
    }

    async fn show_history(&self, message: &IncomingMessage, user: &User) {
        let Some(chat_id) = user.active_chat_id.as_ref() else {
            self.notify(message, user.lang, TextKey::NoActiveChat).await;
            return;
        };

        let messages = match recent_messages(
            self.services.storage.as_ref(),
            chat_id,
            HISTORY_DISPLAY_WINDOW,
        )
        .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(user_id = user.id, %chat_id, error = %e, "Failed to load history");
                self.notify(message, user.lang, TextKey::RetryLater).await;
                return;
            }
        };
        if messages.is_empty() {
            self.notify(message, user.lang, TextKey::EmptyHistory).await;
            return;
        }

        let _ = self
            .renderer
            .send(
                OutgoingText::new(message.chat_id, format_history(&messages, user.lang))
                    .markup(Markup::Legacy)
                    .reply_to(Some(message.message_id)),
            )
            .await;
    }

    async fn handle_callback(
        &self,
        callback: &IncomingCallback,
        user: User,
    ) -> Result<(), PipelineError> {
        match CallbackAction::parse(&callback.data) {
            Ok(CallbackAction::SwitchChat(chat_id)) => {
                self.switch_chat(callback, user, chat_id).await;
            }
            Ok(CallbackAction::Admin(action)) => {
                // Admin payloads are routed away before reaching here
                warn!(user_id = user.id, ?action, "Admin action in regular pipeline");
                self.renderer.acknowledge(&callback.id, None).await;
            }
            Err(e) => {
                debug!(user_id = user.id, error = %e, "Unusable callback payload");
                self.renderer
                    .acknowledge(
                        &callback.id,
                        Some(l10n::text(user.lang, TextKey::InvalidIdentifier).to_string()),
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn switch_chat(&self, callback: &IncomingCallback, mut user: User, chat_id: ChatId) {
        let chat = match self.services.storage.get_chat(&chat_id).await {
            Ok(Some(chat)) if chat.user_id == user.id => chat,
            Ok(_) => {
                info!(user_id = user.id, %chat_id, "Switch to unknown or foreign chat");
                self.renderer
                    .acknowledge(
                        &callback.id,
                        Some(l10n::text(user.lang, TextKey::ChatNotFound).to_string()),
                    )
                    .await;
                return;
            }
            Err(e) => {
                warn!(user_id = user.id, %chat_id, error = %e, "Failed to load chat");
                self.renderer
                    .acknowledge(
                        &callback.id,
                        Some(l10n::text(user.lang, TextKey::ChatNotFound).to_string()),
                    )
                    .await;
                return;
            }
        };

        let title = chat.display_title().to_string();
        self.renderer
            .acknowledge(&callback.id, Some(title.clone()))
            .await;

        user.active_chat_id = Some(chat.id.clone());
        if let Err(e) = self.services.storage.update_user(&user).await {
            error!(user_id = user.id, error = %e, "Failed to switch active chat");
            if let Some(conversation) = callback.chat_id {
                self.renderer
                    .notify(conversation, None, l10n::text(user.lang, TextKey::RetryLater))
                    .await;
            }
            return;
        }
        info!(user_id = user.id, chat_id = %chat.id, "Switched active chat");

        let Some(conversation) = callback.chat_id else {
            return;
        };
        let notice = l10n::format(user.lang, TextKey::ActiveChat, &[("title", title.as_str())]);
        if let Ok(sent) = self.renderer.system(conversation, None, &notice).await {
            if let Err(e) = self
                .services
                .transport
                .pin_message(conversation, sent.message_id)
                .await
            {
                warn!(chat_id = conversation, error = %e, "Failed to pin thread anchor");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, MockLlmProvider};
    use crate::storage::{MemoryStorage, StorageProvider};
    use crate::testing::{
        actor, callback, mock_llm_reply, services, text_message, voice_message, voice_pipeline,
        RecordingTransport, TransportCall, BOT_ID,
    };
    use std::sync::Arc;

    struct Harness {
        storage: Arc<MemoryStorage>,
        transport: Arc<RecordingTransport>,
        handler: ConversationHandler,
    }

    fn harness_with(transport: RecordingTransport, llm: MockLlmProvider) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let transport = Arc::new(transport);
        let services = services(storage.clone(), transport.clone(), llm);
        let voice = voice_pipeline(&services);
        Harness {
            handler: ConversationHandler::new(services, voice),
            storage,
            transport,
        }
    }

    fn harness(llm: MockLlmProvider) -> Harness {
        harness_with(RecordingTransport::new(), llm)
    }

    async fn stored_user(h: &Harness, id: i64) -> User {
        h.storage
            .get_or_create_user(&User::new(id, "alice"))
            .await
            .expect("user")
    }

    async fn say(h: &Harness, id: i32, text: &str) {
        let user = stored_user(h, 1).await;
        let event = InboundEvent::Message(text_message(actor(1, "alice"), id, text));
        h.handler.handle(&event, user).await.expect("handled");
    }

    #[tokio::test]
    async fn test_first_message_starts_chat_and_pins_it() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "  Hello there  ").await;

        let user = stored_user(&h, 1).await;
        let chat_id = user.active_chat_id.expect("active chat");
        let chat = h.storage.get_chat(&chat_id).await.expect("get").expect("chat");
        assert_eq!(chat.title, "Hello there");
        assert_eq!(chat.user_id, 1);

        assert!(h.transport.calls().contains(&TransportCall::Pin(1, 10)));

        let messages = recent_messages(h.storage.as_ref(), &chat_id, 10)
            .await
            .expect("history");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].id, 10);
        assert_eq!(messages[0].text, "Hello there");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].user_id, BOT_ID);
        assert_eq!(messages[1].reply_to_id, Some(10));
        assert_eq!(messages[1].text, "Hi!");
        assert!(messages[1].additional.is_some());
    }

    #[tokio::test]
    async fn test_loading_placeholder_is_sent_then_deleted() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "Hello there").await;

        let sent = h.transport.sent_texts();
        assert_eq!(sent[0].text, "`Loading...`");
        assert!(sent[0].remove_reply_keyboard);
        assert_eq!(sent[0].reply_to, Some(10));
        assert_eq!(sent[1].text, "Hi!");
        assert_eq!(sent[1].markup, Markup::Rich);
        assert_eq!(
            h.transport.calls().last(),
            Some(&TransportCall::Delete(1, 1000))
        );
    }

    #[tokio::test]
    async fn test_second_message_appends_with_history() {
        let mut llm = MockLlmProvider::new();
        let mut seq = mockall::Sequence::new();
        llm.expect_chat_completion()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| r.history.is_empty() && r.user_message == "First question")
            .returning(|_| {
                Ok(Completion {
                    content: "First answer".into(),
                    raw: serde_json::Value::Null,
                })
            });
        llm.expect_chat_completion()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| {
                r.history.len() == 2
                    && r.history[0].content == "First question"
                    && r.history[1].content == "First answer"
                    && r.end_user == "1"
            })
            .returning(|_| {
                Ok(Completion {
                    content: "Second answer".into(),
                    raw: serde_json::Value::Null,
                })
            });
        let h = harness(llm);

        say(&h, 10, "First question").await;
        say(&h, 11, "Second question").await;

        assert_eq!(h.storage.list_user_chats(1).await.expect("chats").len(), 1);
        let pins = h
            .transport
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::Pin(..)))
            .count();
        assert_eq!(pins, 1);
    }

    #[tokio::test]
    async fn test_too_short_message_is_rejected() {
        let mut llm = MockLlmProvider::new();
        llm.expect_chat_completion().never();
        let h = harness(llm);
        say(&h, 10, " a ").await;

        assert!(h.transport.bodies().contains(&"`Too short message`".to_string()));
        assert!(stored_user(&h, 1).await.active_chat_id.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_user_turn() {
        let mut llm = MockLlmProvider::new();
        llm.expect_chat_completion()
            .returning(|_| Err(LlmError::NetworkError("timeout".into())));
        let h = harness(llm);

        say(&h, 10, "Hello there").await;
        say(&h, 11, "/history").await;

        let bodies = h.transport.bodies();
        assert!(bodies.contains(&"`Failed, try again`".to_string()));
        assert!(bodies.contains(&"*Your message*:\nHello there".to_string()));
    }

    #[tokio::test]
    async fn test_context_overflow_suggests_new() {
        let mut llm = MockLlmProvider::new();
        llm.expect_chat_completion().returning(|_| {
            Err(LlmError::ContextLengthExceeded(
                "maximum context length".into(),
            ))
        });
        let h = harness(llm);
        say(&h, 10, "Hello there").await;

        assert!(h
            .transport
            .bodies()
            .contains(&"`Start new context with /new command`".to_string()));
    }

    #[tokio::test]
    async fn test_undelivered_answer_is_stored_with_zero_id() {
        let h = harness_with(RecordingTransport::failing_delivery(), mock_llm_reply("Hi!"));
        say(&h, 10, "Hello there").await;

        let chat_id = stored_user(&h, 1).await.active_chat_id.expect("chat");
        let messages = recent_messages(h.storage.as_ref(), &chat_id, 10)
            .await
            .expect("history");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, 0);
    }

    #[tokio::test]
    async fn test_pin_failure_is_not_fatal() {
        let h = harness_with(RecordingTransport::failing_pins(), mock_llm_reply("Hi!"));
        say(&h, 10, "Hello there").await;

        assert!(h.transport.bodies().contains(&"Hi!".to_string()));
    }

    #[tokio::test]
    async fn test_new_clears_active_chat_and_unpins() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "Hello there").await;
        say(&h, 11, "/new").await;

        assert!(stored_user(&h, 1).await.active_chat_id.is_none());
        assert!(h.transport.calls().contains(&TransportCall::UnpinAll(1)));
        assert!(h
            .transport
            .bodies()
            .contains(&"`New context started`".to_string()));

        say(&h, 12, "Another topic").await;
        assert_eq!(h.storage.list_user_chats(1).await.expect("chats").len(), 2);
    }

    #[tokio::test]
    async fn test_start_sends_welcome() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "/start").await;

        let sent = h.transport.sent_texts();
        assert!(sent[1].text.starts_with("Welcome!"));
        assert_eq!(sent[1].markup, Markup::Legacy);
    }

    #[tokio::test]
    async fn test_unknown_and_admin_commands() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "/frobnicate").await;
        say(&h, 11, "/admin users").await;

        let unknown = h
            .transport
            .bodies()
            .into_iter()
            .filter(|b| b == "`Unknown command`")
            .count();
        assert_eq!(unknown, 2);
    }

    #[tokio::test]
    async fn test_image_prompt_too_short() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate_images().never();
        let h = harness(llm);
        say(&h, 10, "/image ab").await;

        assert!(h
            .transport
            .bodies()
            .contains(&"`Please write more information`".to_string()));
    }

    #[tokio::test]
    async fn test_image_generation_sends_photos() {
        let mut llm = MockLlmProvider::new();
        llm.expect_generate_images()
            .withf(|r| r.prompt == "a red fox" && r.count == 2 && r.end_user == "1")
            .returning(|_| Ok(vec!["https://img/1.png".to_string()]));
        let h = harness(llm);
        say(&h, 10, "/image a red fox").await;

        assert!(h.transport.calls().contains(&TransportCall::SendPhotos(
            1,
            vec!["https://img/1.png".to_string()]
        )));
    }

    #[tokio::test]
    async fn test_chats_without_threads() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "/chats").await;

        assert!(h.transport.bodies().contains(&"`No chats found`".to_string()));
    }

    #[tokio::test]
    async fn test_chats_lists_switch_buttons() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "Hello there").await;
        say(&h, 11, "/chats").await;

        let chat_id = stored_user(&h, 1).await.active_chat_id.expect("chat");
        let listing = h
            .transport
            .sent_texts()
            .into_iter()
            .find(|m| m.keyboard.is_some())
            .expect("listing");
        let keyboard = listing.keyboard.expect("keyboard");
        assert_eq!(keyboard.len(), 1);
        assert_eq!(keyboard[0][0].label, "» Hello there");
        assert_eq!(keyboard[0][0].data, chat_id.as_str());
    }

    #[tokio::test]
    async fn test_history_without_active_chat() {
        let h = harness(mock_llm_reply("Hi!"));
        say(&h, 10, "/history").await;

        assert!(h
            .transport
            .bodies()
            .contains(&"`There is no active chat`".to_string()));
    }

    #[tokio::test]
    async fn test_voice_message_prefixes_transcript() {
        let mut llm = MockLlmProvider::new();
        llm.expect_transcribe_audio()
            .returning(|_, _, _| Ok("play some jazz".to_string()));
        llm.expect_chat_completion()
            .withf(|r| r.user_message == "play some jazz")
            .returning(|_| {
                Ok(Completion {
                    content: "Sure.".into(),
                    raw: serde_json::Value::Null,
                })
            });
        let h = harness(llm);

        let user = stored_user(&h, 1).await;
        let event = InboundEvent::Message(voice_message(actor(1, "alice"), 10, "voice-1"));
        h.handler.handle(&event, user).await.expect("handled");

        assert!(h
            .transport
            .bodies()
            .contains(&"*voice text*:\n```\nplay some jazz\n```\n\nSure.".to_string()));
    }

    #[tokio::test]
    async fn test_failed_transcription_stops_turn() {
        let mut llm = MockLlmProvider::new();
        llm.expect_transcribe_audio()
            .returning(|_, _, _| Err(LlmError::NetworkError("reset".into())));
        llm.expect_chat_completion().never();
        let h = harness(llm);

        let user = stored_user(&h, 1).await;
        let event = InboundEvent::Message(voice_message(actor(1, "alice"), 10, "voice-1"));
        h.handler.handle(&event, user).await.expect("handled");

        assert!(stored_user(&h, 1).await.active_chat_id.is_none());
    }

    #[tokio::test]
    async fn test_pinned_service_message_is_ignored() {
        let h = harness(mock_llm_reply("Hi!"));
        let user = stored_user(&h, 1).await;
        let mut message = text_message(actor(1, "alice"), 10, "Hello there");
        message.is_pinned_service = true;

        h.handler
            .handle(&InboundEvent::Message(message), user)
            .await
            .expect("handled");
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_switch_chat_callback() {
        let h = harness(mock_llm_reply("Hi!"));
        let owner = stored_user(&h, 1).await;
        let chat = Chat::new(&owner, "Old topic");
        h.storage.create_chat(&chat).await.expect("create");

        let event = callback(actor(1, "alice"), chat.id.as_str());
        h.handler.handle(&event, owner).await.expect("handled");

        assert_eq!(stored_user(&h, 1).await.active_chat_id, Some(chat.id));
        let calls = h.transport.calls();
        assert!(calls.contains(&TransportCall::AnswerCallback(
            "cb-1".into(),
            Some("Old topic".into())
        )));
        assert!(h
            .transport
            .bodies()
            .contains(&"`Active chat: Old topic`".to_string()));
        assert!(calls.contains(&TransportCall::Pin(1, 1000)));
    }

    #[tokio::test]
    async fn test_switch_to_foreign_chat_is_refused() {
        let h = harness(mock_llm_reply("Hi!"));
        let other = User::new(2, "bob");
        let chat = Chat::new(&other, "Secret");
        h.storage.create_chat(&chat).await.expect("create");

        let user = stored_user(&h, 1).await;
        let event = callback(actor(1, "alice"), chat.id.as_str());
        h.handler.handle(&event, user).await.expect("handled");

        assert!(stored_user(&h, 1).await.active_chat_id.is_none());
        assert!(h.transport.calls().contains(&TransportCall::AnswerCallback(
            "cb-1".into(),
            Some("Chat not found".into())
        )));
    }

    #[tokio::test]
    async fn test_malformed_callback_gets_toast() {
        let h = harness(mock_llm_reply("Hi!"));
        let user = stored_user(&h, 1).await;
        let event = callback(actor(1, "alice"), "not-a-chat");
        h.handler.handle(&event, user).await.expect("handled");

        assert_eq!(
            h.transport.calls(),
            vec![TransportCall::AnswerCallback(
                "cb-1".into(),
                Some("Invalid identifier".into())
            )]
        );
    }

    #[test]
    fn test_format_history_header_only_when_window_full() {
        let chat = ChatId::generate();
        let message = |role, text: &str| Message {
            id: 1,
            chat_id: chat.clone(),
            reply_to_id: None,
            user_id: 1,
            username: "alice".into(),
            role,
            text: text.into(),
            additional: None,
            created_at: Utc::now(),
        };

        let short = vec![message(Role::User, "hi"), message(Role::Assistant, "hello")];
        assert_eq!(
            format_history(&short, Lang::En),
            "*Your message*:\nhi\n\n`Assistant's answer`:\nhello"
        );

        let full: Vec<_> = (0..HISTORY_DISPLAY_WINDOW)
            .map(|i| message(Role::User, &i.to_string()))
            .collect();
        assert!(format_history(&full, Lang::En).starts_with("Last 10 messages:\n\n"));
    }
}
