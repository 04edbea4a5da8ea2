//! Configuration and settings management
//!
//! Loads settings from files and environment variables and defines the
//! constants shared by the pipeline.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Maximum text length of a single message, in UTF-16 code units
pub const MAX_MESSAGE_LEN: usize = 4096;
/// Messages of history sent to the backend with each turn
pub const BACKEND_CONTEXT_WINDOW: usize = 20;
/// Messages shown by the `/history` command
pub const HISTORY_DISPLAY_WINDOW: usize = 10;
/// Messages shown in the admin transcript view
pub const ADMIN_TRANSCRIPT_WINDOW: usize = 50;
/// Rows per page in admin listings
pub const ADMIN_PAGE_SIZE: usize = 20;
/// Minimum trimmed length of an ordinary message
pub const MIN_MESSAGE_LEN: usize = 2;
/// Minimum trimmed length of an image prompt
pub const MIN_IMAGE_PROMPT_LEN: usize = 3;
/// Ban reason assigned from the admin panel
pub const ADMIN_BAN_REASON: &str = "...";
/// Label used for chats without a title
pub const EMPTY_TITLE_PLACEHOLDER: &str = "[empty title]";
/// Capacity of the inbound event queue
pub const WORKER_QUEUE_CAPACITY: usize = 256;

/// Initial backoff for transport file operations
pub const TRANSPORT_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for transport file operations
pub const TRANSPORT_MAX_BACKOFF_MS: u64 = 4000;
/// Attempts for transport file operations
pub const TRANSPORT_MAX_RETRIES: usize = 3;

/// Storage backend selection
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Cloudflare R2 / S3
    #[default]
    R2,
    /// Process-local, lost on restart
    Memory,
}

/// Core settings loaded from environment variables and config files
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// OpenAI API key
    #[serde(alias = "chatgpt_key")]
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible API base URL
    #[serde(default = "default_openai_api_base")]
    pub openai_api_base: String,
    /// Default chat completion model
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Default completion length limit
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    /// Image generation model
    #[serde(default = "default_image_model")]
    pub image_model: String,
    /// Images produced per `/image` request
    #[serde(default = "default_image_count")]
    pub image_count: u8,
    /// Generated image size
    #[serde(default = "default_image_size")]
    pub image_size: String,
    /// Speech-to-text model
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Handle of the single privileged user
    pub admin_user: Option<String>,
    /// Number of concurrent pipeline workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Storage backend
    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,
}

fn default_openai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}

const fn default_max_tokens() -> u32 {
    300
}

fn default_image_model() -> String {
    "dall-e-2".to_string()
}

const fn default_image_count() -> u8 {
    2
}

fn default_image_size() -> String {
    "256x256".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

const fn default_worker_count() -> usize {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_api_base: default_openai_api_base(),
            chat_model: default_chat_model(),
            default_max_tokens: default_max_tokens(),
            image_model: default_image_model(),
            image_count: default_image_count(),
            image_size: default_image_size(),
            transcription_model: default_transcription_model(),
            ffmpeg_path: default_ffmpeg_path(),
            admin_user: None,
            worker_count: default_worker_count(),
            storage_backend: StorageBackend::default(),
            r2_access_key_id: None,
            r2_secret_access_key: None,
            r2_endpoint_url: None,
            r2_bucket_name: None,
        }
    }
}

/// Build the layered configuration shared by all settings structs.
///
/// Sources, lowest priority first: `config/default`, `config/{RUN_MODE}`,
/// `config/local`, `APP__*` variables, plain environment variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

fn env_fallback(slot: &mut Option<String>, var: &str) {
    if slot.is_none() {
        if let Ok(val) = std::env::var(var) {
            if !val.is_empty() {
                *slot = Some(val);
            }
        }
    }
}

impl Settings {
    /// Load settings from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading or validation fails.
    pub fn new() -> Result<Self, ConfigError> {
        let mut settings: Self = build_config()?.try_deserialize()?;

        env_fallback(&mut settings.openai_api_key, "CHATGPT_KEY");
        env_fallback(&mut settings.openai_api_key, "OPENAI_API_KEY");
        env_fallback(&mut settings.admin_user, "ADMIN_USER");
        env_fallback(&mut settings.r2_endpoint_url, "R2_ENDPOINT_URL");
        env_fallback(&mut settings.r2_access_key_id, "R2_ACCESS_KEY_ID");
        env_fallback(&mut settings.r2_secret_access_key, "R2_SECRET_ACCESS_KEY");
        env_fallback(&mut settings.r2_bucket_name, "R2_BUCKET_NAME");

        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Message("worker_count must be at least 1".into()));
        }
        if self.image_count == 0 || self.image_count > 10 {
            return Err(ConfigError::Message(
                "image_count must be between 1 and 10".into(),
            ));
        }
        Ok(())
    }

    /// Privileged handle without a leading `@`, if configured
    #[must_use]
    pub fn admin_handle(&self) -> Option<&str> {
        self.admin_user
            .as_deref()
            .map(|h| h.trim().trim_start_matches('@'))
            .filter(|h| !h.is_empty())
    }

    /// Whether `username` is the configured privileged handle
    #[must_use]
    pub fn is_admin(&self, username: Option<&str>) -> bool {
        match (self.admin_handle(), username) {
            (Some(admin), Some(name)) => admin == name.trim_start_matches('@'),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_handle_normalization() {
        let settings = Settings {
            admin_user: Some(" @boss ".to_string()),
            ..Settings::default()
        };
        assert_eq!(settings.admin_handle(), Some("boss"));
        assert!(settings.is_admin(Some("boss")));
        assert!(settings.is_admin(Some("@boss")));
        assert!(!settings.is_admin(Some("Boss")));
        assert!(!settings.is_admin(None));
    }

    #[test]
    fn test_no_admin_configured() {
        let settings = Settings {
            admin_user: Some(String::new()),
            ..Settings::default()
        };
        assert_eq!(settings.admin_handle(), None);
        assert!(!settings.is_admin(Some("")));
    }

    #[test]
    fn test_defaults_match_backend_contract() {
        let settings = Settings::default();
        assert_eq!(settings.chat_model, "gpt-3.5-turbo");
        assert_eq!(settings.default_max_tokens, 300);
        assert_eq!(settings.image_count, 2);
        assert_eq!(settings.image_size, "256x256");
        assert_eq!(settings.worker_count, 3);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let settings = Settings {
            worker_count: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_deserialize_from_layered_source() {
        let cfg = Config::builder()
            .set_override("chatgpt_key", "sk-test")
            .expect("override")
            .set_override("storage_backend", "memory")
            .expect("override")
            .set_override("worker_count", 5)
            .expect("override")
            .build()
            .expect("config builds");
        let settings: Settings = cfg.try_deserialize().expect("settings deserialize");
        assert_eq!(settings.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.storage_backend, StorageBackend::Memory);
        assert_eq!(settings.worker_count, 5);
    }
}
