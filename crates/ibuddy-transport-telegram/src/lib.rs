#![deny(missing_docs)]
//! Telegram transport adapter for ibuddy.

/// Telegram transport configuration.
pub mod config;
/// Conversion of Telegram updates into core events.
pub mod convert;
/// Telegram runtime entrypoint.
pub mod runner;
/// `ChatTransport` implementation over the Bot API.
pub mod transport;
