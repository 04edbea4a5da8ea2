//! Outbound rendering with markup degradation.

use crate::config::MAX_MESSAGE_LEN;
use crate::transport::{ChatTransport, Markup, OutgoingText, SentMessage, TransportError};
use crate::utils::truncate_utf16;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sends text through the transport, truncating oversized bodies and
/// retrying with plainer markup when the platform cannot parse it.
#[derive(Clone)]
pub struct Renderer {
    transport: Arc<dyn ChatTransport>,
}

impl Renderer {
    /// Wrap a transport
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Send `message`, degrading rich → legacy → plain on markup errors.
    ///
    /// Bodies longer than [`MAX_MESSAGE_LEN`] UTF-16 code units are cut to
    /// that length, possibly mid-token.
    ///
    /// # Errors
    ///
    /// Returns the first non-markup transport error, or the markup error of
    /// the plainest attempt.
    pub async fn send(&self, mut message: OutgoingText) -> Result<SentMessage, TransportError> {
        message.text = truncate_utf16(&message.text, MAX_MESSAGE_LEN);

        loop {
            match self.transport.send_text(message.clone()).await {
                Ok(sent) => return Ok(sent),
                Err(TransportError::MarkupParse(reason)) => match message.markup.degrade() {
                    Some(next) => {
                        debug!(from = ?message.markup, to = ?next, %reason, "Markup rejected, degrading");
                        message.markup = next;
                    }
                    None => {
                        warn!(chat_id = message.chat_id, %reason, "Plain text rejected as markup");
                        return Err(TransportError::MarkupParse(reason));
                    }
                },
                Err(e) => {
                    warn!(chat_id = message.chat_id, error = %e, "Failed to deliver message");
                    return Err(e);
                }
            }
        }
    }

    /// Send a short bot notice, wrapped as inline code
    ///
    /// # Errors
    ///
    /// Same as [`Renderer::send`].
    pub async fn system(
        &self,
        chat_id: i64,
        reply_to: Option<i32>,
        text: &str,
    ) -> Result<SentMessage, TransportError> {
        self.send(
            OutgoingText::new(chat_id, format!("`{text}`"))
                .markup(Markup::Legacy)
                .reply_to(reply_to),
        )
        .await
    }

    /// Best-effort [`Renderer::system`]; failures are already logged by `send`
    pub async fn notify(&self, chat_id: i64, reply_to: Option<i32>, text: &str) {
        let _ = self.system(chat_id, reply_to, text).await;
    }

    /// Best-effort callback acknowledgement with an optional toast
    pub async fn acknowledge(&self, callback_id: &str, text: Option<String>) {
        if let Err(e) = self.transport.answer_callback(callback_id, text).await {
            warn!(callback_id, error = %e, "Failed to answer callback");
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;

    fn renderer(transport: &Arc<RecordingTransport>) -> Renderer {
        Renderer::new(transport.clone())
    }

    #[tokio::test]
    async fn test_long_text_truncated_to_limit() {
        let transport = Arc::new(RecordingTransport::new());
        let text = "ж".repeat(MAX_MESSAGE_LEN + 100);
        renderer(&transport)
            .send(OutgoingText::new(1, text))
            .await
            .expect("sent");

        let sent = transport.sent_texts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text.chars().count(), MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn test_astral_text_truncated_to_utf16_limit() {
        let transport = Arc::new(RecordingTransport::new());
        renderer(&transport)
            .send(OutgoingText::new(1, "😀".repeat(5000)))
            .await
            .expect("sent");

        let sent = &transport.sent_texts()[0];
        assert_eq!(sent.text.encode_utf16().count(), MAX_MESSAGE_LEN);
        assert_eq!(sent.text.chars().count(), MAX_MESSAGE_LEN / 2);
    }

    #[tokio::test]
    async fn test_degradation_order_rich_legacy_plain() {
        let transport = Arc::new(RecordingTransport::rejecting(&[Markup::Rich, Markup::Legacy]));
        let sent = renderer(&transport)
            .send(OutgoingText::new(1, "*hi*").markup(Markup::Rich))
            .await;
        assert!(sent.is_ok());

        let attempts: Vec<Markup> = transport.sent_texts().iter().map(|m| m.markup).collect();
        assert_eq!(attempts, vec![Markup::Rich, Markup::Legacy, Markup::Plain]);
    }

    #[tokio::test]
    async fn test_stops_at_first_non_parse_outcome() {
        let transport = Arc::new(RecordingTransport::rejecting(&[Markup::Rich]));
        renderer(&transport)
            .send(OutgoingText::new(1, "_x_").markup(Markup::Rich))
            .await
            .expect("sent");
        let attempts: Vec<Markup> = transport.sent_texts().iter().map(|m| m.markup).collect();
        assert_eq!(attempts, vec![Markup::Rich, Markup::Legacy]);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let transport = Arc::new(RecordingTransport::failing_delivery());
        let result = renderer(&transport)
            .send(OutgoingText::new(1, "x").markup(Markup::Rich))
            .await;
        assert!(matches!(result, Err(TransportError::Delivery(_))));
        assert_eq!(transport.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn test_system_message_is_inline_code() {
        let transport = Arc::new(RecordingTransport::new());
        renderer(&transport)
            .system(5, Some(9), "New context started")
            .await
            .expect("sent");
        let sent = &transport.sent_texts()[0];
        assert_eq!(sent.text, "`New context started`");
        assert_eq!(sent.markup, Markup::Legacy);
        assert_eq!(sent.reply_to, Some(9));
    }
}
