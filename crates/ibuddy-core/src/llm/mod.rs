//! Generative backend port
//!
//! Chat completion, image generation and speech transcription behind one
//! trait, with an OpenAI implementation.

mod common;
mod openai;

pub use openai::OpenAiProvider;

use crate::model::Role;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during backend operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// The conversation no longer fits the model context
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Missing provider configuration or API key
    #[error("Missing client/API key: {0}")]
    MissingConfig(String),
    /// Any other unexpected error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl LlmError {
    /// Classify a provider error message
    #[must_use]
    pub fn from_api_message(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("maximum context length") || lower.contains("context_length_exceeded") {
            Self::ContextLengthExceeded(message)
        } else {
            Self::ApiError(message)
        }
    }
}

/// A message in a backend conversation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Message {
    /// Create a new user message
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    /// Create a new assistant message
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// Input of a chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Prior turns, oldest first
    pub history: Vec<Message>,
    /// Current user turn
    pub user_message: String,
    /// Model name
    pub model_id: String,
    /// Output length limit
    pub max_tokens: u32,
    /// End-user identifier forwarded for abuse monitoring
    pub end_user: String,
}

/// Output of a chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Answer text
    pub content: String,
    /// Raw response, stored for audit
    pub raw: serde_json::Value,
}

/// Input of an image generation
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// Description
    pub prompt: String,
    /// Number of images
    pub count: u8,
    /// `WIDTHxHEIGHT`
    pub size: String,
    /// End-user identifier
    pub end_user: String,
}

/// Interface for generative backends
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a chat completion
    async fn chat_completion(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    /// Generate images, returning their URLs
    async fn generate_images(&self, request: ImageRequest) -> Result<Vec<String>, LlmError>;

    /// Transcribe audio content
    async fn transcribe_audio(
        &self,
        audio_bytes: Vec<u8>,
        file_name: &str,
        model_id: &str,
    ) -> Result<String, LlmError>;
}
