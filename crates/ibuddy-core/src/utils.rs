//! Utility functions

use crate::config::{
    TRANSPORT_INITIAL_BACKOFF_MS, TRANSPORT_MAX_BACKOFF_MS, TRANSPORT_MAX_RETRIES,
};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Truncate a string to `max_chars` characters, never splitting a character.
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Truncate a string to at most `max_units` UTF-16 code units, the unit
/// Telegram measures message length in. Never splits a character.
#[must_use]
pub fn truncate_utf16(s: impl AsRef<str>, max_units: usize) -> String {
    let s = s.as_ref();
    let mut units = 0;
    for (pos, c) in s.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return s[..pos].to_string();
        }
    }
    s.to_string()
}

/// Retry a transport file operation with exponential backoff and jitter.
///
/// Used for attachment URL resolution and downloads, which fail on
/// transient network errors. Message delivery is never retried here.
///
/// # Errors
///
/// Returns the last error after all attempts are exhausted.
pub async fn retry_transport_operation<F, Fut, T, E>(operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let retry_strategy = ExponentialBackoff::from_millis(TRANSPORT_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TRANSPORT_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TRANSPORT_MAX_RETRIES - 1);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            attempts = TRANSPORT_MAX_RETRIES,
            error = %e,
            "Transport operation failed"
        );
        e
    })
}
