//! Testing helpers and mock utilities.
//!
//! A recording transport, canned backends and event builders shared by the
//! unit tests of the pipeline modules.

use crate::config::Settings;
use crate::event::{Actor, AudioAttachment, IncomingCallback, IncomingMessage, InboundEvent};
use crate::llm::{Completion, LlmError, MockLlmProvider};
use crate::pipeline::Services;
use crate::storage::{MemoryStorage, StorageProvider};
use crate::transport::{ChatTransport, Markup, OutgoingText, SentMessage, TransportError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// Bot account used by [`RecordingTransport`]
pub const BOT_ID: i64 = 999;
/// Bot handle used by [`RecordingTransport`]
pub const BOT_USERNAME: &str = "ibuddy_bot";

/// A transport call, as recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `send_text`, including rejected attempts
    SendText(OutgoingText),
    /// `pin_message`
    Pin(i64, i32),
    /// `unpin_all`
    UnpinAll(i64),
    /// `delete_message`
    Delete(i64, i32),
    /// `answer_callback`
    AnswerCallback(String, Option<String>),
    /// `send_photos`
    SendPhotos(i64, Vec<String>),
    /// `file_download_url`
    FileUrl(String),
}

/// Transport fake that records every call
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    rejected_markup: HashSet<Markup>,
    fail_delivery: bool,
    fail_pins: bool,
    next_id: AtomicI32,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            rejected_markup: HashSet::new(),
            fail_delivery: false,
            fail_pins: false,
            next_id: AtomicI32::new(1000),
        }
    }
}

impl RecordingTransport {
    /// Transport where every call succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that cannot parse the given markup modes
    #[must_use]
    pub fn rejecting(markups: &[Markup]) -> Self {
        Self {
            rejected_markup: markups.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Transport whose text delivery always fails
    #[must_use]
    pub fn failing_delivery() -> Self {
        Self {
            fail_delivery: true,
            ..Self::default()
        }
    }

    /// Transport whose pin calls fail
    #[must_use]
    pub fn failing_pins() -> Self {
        Self {
            fail_pins: true,
            ..Self::default()
        }
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().expect("calls lock").push(call);
    }

    /// All recorded calls in order
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Every `send_text` attempt
    pub fn sent_texts(&self) -> Vec<OutgoingText> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TransportCall::SendText(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Bodies of every `send_text` attempt
    pub fn bodies(&self) -> Vec<String> {
        self.sent_texts().into_iter().map(|m| m.text).collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn bot_identity(&self) -> Actor {
        Actor {
            id: BOT_ID,
            username: Some(BOT_USERNAME.to_string()),
            language_code: None,
            is_bot: true,
        }
    }

    async fn send_text(&self, message: OutgoingText) -> Result<SentMessage, TransportError> {
        let markup = message.markup;
        self.record(TransportCall::SendText(message));
        if self.fail_delivery {
            return Err(TransportError::Delivery("chat not found".into()));
        }
        if self.rejected_markup.contains(&markup) {
            return Err(TransportError::MarkupParse("can't parse entities".into()));
        }
        Ok(SentMessage {
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn pin_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.record(TransportCall::Pin(chat_id, message_id));
        if self.fail_pins {
            return Err(TransportError::Delivery("not enough rights".into()));
        }
        Ok(())
    }

    async fn unpin_all(&self, chat_id: i64) -> Result<(), TransportError> {
        self.record(TransportCall::UnpinAll(chat_id));
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TransportError> {
        self.record(TransportCall::Delete(chat_id, message_id));
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<String>,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::AnswerCallback(callback_id.to_string(), text));
        Ok(())
    }

    async fn send_photos(
        &self,
        chat_id: i64,
        urls: Vec<String>,
        _reply_to: Option<i32>,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SendPhotos(chat_id, urls));
        Ok(())
    }

    async fn file_download_url(&self, file_id: &str) -> Result<String, TransportError> {
        self.record(TransportCall::FileUrl(file_id.to_string()));
        Ok(format!("https://files.example/{file_id}"))
    }
}

/// Backend mock answering every completion with `reply`.
///
/// Image and transcription calls fail.
#[must_use]
pub fn mock_llm_reply(reply: &'static str) -> MockLlmProvider {
    let mut mock = MockLlmProvider::new();
    mock.expect_chat_completion().returning(move |_| {
        Ok(Completion {
            content: reply.to_string(),
            raw: serde_json::json!({ "choices": [{ "message": { "content": reply } }] }),
        })
    });
    mock.expect_generate_images()
        .returning(|_| Err(LlmError::Unknown("Not implemented".to_string())));
    mock.expect_transcribe_audio()
        .returning(|_, _, _| Err(LlmError::Unknown("Not implemented".to_string())));
    mock
}

/// Settings with `admin` as the privileged handle
#[must_use]
pub fn test_settings() -> Settings {
    Settings {
        admin_user: Some("admin".to_string()),
        ..Settings::default()
    }
}

/// Services over in-memory storage and a recording transport
#[must_use]
pub fn services(
    storage: Arc<MemoryStorage>,
    transport: Arc<RecordingTransport>,
    llm: MockLlmProvider,
) -> Services {
    let storage: Arc<dyn StorageProvider> = storage;
    Services {
        storage,
        transport,
        llm: Arc::new(llm),
        settings: Arc::new(test_settings()),
    }
}

/// Human actor with an English client
#[must_use]
pub fn actor(id: i64, username: &str) -> Actor {
    Actor {
        id,
        username: Some(username.to_string()),
        language_code: Some("en".to_string()),
        is_bot: false,
    }
}

/// Text message from `from` in their private chat
#[must_use]
pub fn text_message(from: Actor, message_id: i32, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: from.id,
        message_id,
        from,
        reply_to_from: None,
        text: Some(text.to_string()),
        audio: None,
        is_pinned_service: false,
    }
}

/// Voice message from `from`
#[must_use]
pub fn voice_message(from: Actor, message_id: i32, file_id: &str) -> IncomingMessage {
    IncomingMessage {
        audio: Some(AudioAttachment {
            file_id: file_id.to_string(),
        }),
        text: None,
        ..text_message(from, message_id, "")
    }
}

/// Button press by `from` on a bot message in their private chat
#[must_use]
pub fn callback(from: Actor, data: &str) -> InboundEvent {
    InboundEvent::Callback(IncomingCallback {
        id: format!("cb-{}", from.id),
        chat_id: Some(from.id),
        message_id: Some(1),
        from,
        data: data.to_string(),
        reply_to_from: None,
    })
}

/// Fetcher writing a fixed payload instead of downloading
pub struct StaticFetcher;

#[async_trait]
impl crate::voice::AudioFetcher for StaticFetcher {
    async fn fetch(
        &self,
        _url: &str,
        dest: &std::path::Path,
    ) -> Result<(), crate::voice::VoiceError> {
        tokio::fs::write(dest, b"ogg").await?;
        Ok(())
    }
}

/// Transcoder copying its input
pub struct CopyTranscoder;

#[async_trait]
impl crate::voice::AudioTranscoder for CopyTranscoder {
    async fn transcode(
        &self,
        input: &std::path::Path,
        output: &std::path::Path,
    ) -> Result<(), crate::voice::VoiceError> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// Voice pipeline that never leaves the process
#[must_use]
pub fn voice_pipeline(services: &Services) -> crate::voice::VoicePipeline {
    crate::voice::VoicePipeline::new(services, Arc::new(StaticFetcher), Arc::new(CopyTranscoder))
}
