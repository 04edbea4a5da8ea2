//! OpenAI backend.
//!
//! Chat goes through the async-openai client; images and transcription
//! use plain HTTP requests against the same API base.

use super::common::{build_openai_messages, extract_openai_response};
use super::{Completion, CompletionRequest, ImageRequest, LlmError, LlmProvider};
use crate::config::Settings;
use async_openai::{config::OpenAIConfig, types::chat::CreateChatCompletionRequestArgs, Client};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// OpenAI provider
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    image_model: String,
}

#[derive(Serialize)]
struct ImageGenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    response_format: &'static str,
    user: &'a str,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAiProvider {
    /// Create a provider from settings
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingConfig` if no API key is configured.
    pub fn new(settings: &Settings) -> Result<Self, LlmError> {
        let api_key = settings
            .openai_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::MissingConfig("CHATGPT_KEY is missing".into()))?;
        let api_base = settings.openai_api_base.trim_end_matches('/').to_string();

        let config = OpenAIConfig::new()
            .with_api_key(api_key.clone())
            .with_api_base(api_base.clone());

        Ok(Self {
            client: Client::with_config(config),
            http: reqwest::Client::new(),
            api_key,
            api_base,
            image_model: settings.image_model.clone(),
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::from_api_message(format!("{status}: {body}")))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    #[instrument(skip(self, request), fields(model = %request.model_id, history = request.history.len()))]
    async fn chat_completion(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let messages = build_openai_messages(&request.history, &request.user_message)?;

        let body = CreateChatCompletionRequestArgs::default()
            .model(request.model_id.as_str())
            .messages(messages)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(|e| LlmError::Unknown(e.to_string()))?;

        let started = Instant::now();
        let response = self
            .client
            .chat()
            .create(body)
            .await
            .map_err(|e| LlmError::from_api_message(e.to_string()))?;

        debug!(
            duration_ms = started.elapsed().as_millis(),
            "Chat completion finished"
        );

        let content = extract_openai_response(&response)?;
        let raw = serde_json::to_value(&response).map_err(|e| LlmError::JsonError(e.to_string()))?;
        Ok(Completion { content, raw })
    }

    #[instrument(skip(self, request), fields(count = request.count, size = %request.size))]
    async fn generate_images(&self, request: ImageRequest) -> Result<Vec<String>, LlmError> {
        let body = ImageGenerationBody {
            model: &self.image_model,
            prompt: &request.prompt,
            n: request.count,
            size: &request.size,
            response_format: "url",
            user: &request.end_user,
        };

        let response = self
            .http
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let parsed: ImageGenerationResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::JsonError(e.to_string()))?;

        let urls: Vec<String> = parsed.data.into_iter().filter_map(|d| d.url).collect();
        if urls.is_empty() {
            warn!("Image generation returned no URLs");
            return Err(LlmError::ApiError("Empty image response".to_string()));
        }
        Ok(urls)
    }

    #[instrument(skip(self, audio_bytes), fields(bytes = audio_bytes.len()))]
    async fn transcribe_audio(
        &self,
        audio_bytes: Vec<u8>,
        file_name: &str,
        model_id: &str,
    ) -> Result<String, LlmError> {
        let file_part = Part::bytes(audio_bytes)
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| LlmError::Unknown(e.to_string()))?;

        let form = Form::new()
            .part("file", file_part)
            .text("model", model_id.to_string());

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let parsed: TranscriptionResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::JsonError(e.to_string()))?;

        Ok(parsed.text)
    }
}
