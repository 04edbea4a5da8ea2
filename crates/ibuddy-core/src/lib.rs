#![deny(missing_docs)]
//! iBuddy core library.
//!
//! Transport-agnostic logic of the relay bot: the update pipeline, chat
//! thread management, rendering, moderation and storage.

/// Admin moderation panel.
pub mod admin;
/// Callback payload protocol.
pub mod callback;
/// Text command parsing.
pub mod command;
/// Configuration management.
pub mod config;
/// Regular-user conversation handling.
pub mod conversation;
/// Inbound events produced by a transport.
pub mod event;
/// Bounded history retrieval.
pub mod history;
/// Localized user-facing texts.
pub mod l10n;
/// Generative backend port and OpenAI client.
pub mod llm;
/// Persisted records.
pub mod model;
/// Ordered update pipeline.
pub mod pipeline;
/// Outbound rendering with markup degradation.
pub mod render;
/// Storage layer (R2/S3 and in-memory).
pub mod storage;
/// Outbound transport port.
pub mod transport;
/// Utility functions.
pub mod utils;
/// Voice transcription pipeline.
pub mod voice;
/// Fixed-size worker pool.
pub mod worker;

#[cfg(test)]
pub mod testing;
