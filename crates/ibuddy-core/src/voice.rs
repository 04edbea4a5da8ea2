//! Voice transcription pipeline
//!
//! Resolve the attachment URL, download it to a temp file, transcode to
//! mono MP3 with ffmpeg, transcribe. Temp files are removed on every exit
//! path when their guards drop.

use crate::event::IncomingMessage;
use crate::l10n::{self, Lang, TextKey};
use crate::llm::{LlmError, LlmProvider};
use crate::pipeline::Services;
use crate::render::Renderer;
use crate::transport::{ChatTransport, TransportError};
use crate::utils::retry_transport_operation;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors of the voice pipeline
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Attachment URL could not be resolved
    #[error("resolve failed: {0}")]
    Resolve(#[from] TransportError),
    /// Download failed
    #[error("download failed: {0}")]
    Download(String),
    /// ffmpeg failed
    #[error("transcode failed: {0}")]
    Transcode(String),
    /// Backend transcription failed
    #[error("transcription failed: {0}")]
    Transcription(#[from] LlmError),
    /// Temp file handling failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Downloads a remote audio file
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Write the resource at `url` to `dest`
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), VoiceError>;
}

/// Converts audio to the backend's input format
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    /// Transcode `input` into `output`, overwriting it
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), VoiceError>;
}

/// HTTP downloader with retries
#[derive(Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl AudioFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), VoiceError> {
        let bytes = retry_transport_operation(|| async {
            self.client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await
        })
        .await
        .map_err(|e| VoiceError::Download(e.to_string()))?;

        tokio::fs::write(dest, &bytes).await?;
        debug!(bytes = bytes.len(), "Downloaded audio");
        Ok(())
    }
}

/// ffmpeg subprocess transcoder
pub struct FfmpegTranscoder {
    binary: String,
}

impl FfmpegTranscoder {
    /// Use the ffmpeg binary at `binary`
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), VoiceError> {
        let result = Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-ac", "1", "-f", "mp3"])
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VoiceError::Transcode(format!("failed to run {}: {e}", self.binary)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(VoiceError::Transcode(format!(
                "{} exited with {}: {}",
                self.binary,
                result.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Turns a voice attachment into text
pub struct VoicePipeline {
    transport: Arc<dyn ChatTransport>,
    llm: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn AudioFetcher>,
    transcoder: Arc<dyn AudioTranscoder>,
    renderer: Renderer,
    model: String,
}

impl VoicePipeline {
    /// Create a pipeline with explicit download and transcode steps
    #[must_use]
    pub fn new(
        services: &Services,
        fetcher: Arc<dyn AudioFetcher>,
        transcoder: Arc<dyn AudioTranscoder>,
    ) -> Self {
        Self {
            transport: services.transport.clone(),
            llm: services.llm.clone(),
            fetcher,
            transcoder,
            renderer: Renderer::new(services.transport.clone()),
            model: services.settings.transcription_model.clone(),
        }
    }

    /// HTTP download and the configured ffmpeg binary
    #[must_use]
    pub fn from_settings(services: &Services) -> Self {
        Self::new(
            services,
            Arc::new(HttpFetcher::default()),
            Arc::new(FfmpegTranscoder::new(services.settings.ffmpeg_path.as_str())),
        )
    }

    /// Transcribed text of the message's audio.
    ///
    /// On failure the user is told to retry and an empty string is
    /// returned; empty means "no voice text available".
    pub async fn extract(&self, message: &IncomingMessage, lang: Lang) -> String {
        let Some(audio) = &message.audio else {
            return String::new();
        };

        match self.transcribe(&audio.file_id).await {
            Ok(text) => {
                info!(chars = text.chars().count(), "Voice message transcribed");
                text
            }
            Err(e) => {
                warn!(chat_id = message.chat_id, error = %e, "Voice extraction failed");
                self.renderer
                    .notify(
                        message.chat_id,
                        Some(message.message_id),
                        l10n::text(lang, TextKey::RetryLater),
                    )
                    .await;
                String::new()
            }
        }
    }

    async fn transcribe(&self, file_id: &str) -> Result<String, VoiceError> {
        let url = retry_transport_operation(|| self.transport.file_download_url(file_id)).await?;

        let source = tempfile::Builder::new().prefix("voice").tempfile()?;
        self.fetcher.fetch(&url, source.path()).await?;

        let target = tempfile::Builder::new()
            .prefix("voice")
            .suffix(".mp3")
            .tempfile()?;
        self.transcoder
            .transcode(source.path(), target.path())
            .await?;

        let audio = tokio::fs::read(target.path()).await?;
        Ok(self
            .llm
            .transcribe_audio(audio, "voice.mp3", &self.model)
            .await?)
    }
}
