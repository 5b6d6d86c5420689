//! Offline provider used for demos and tests.

use super::{ChatProvider, ChatSession, MessagePart, ProviderError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Holds replies until released, so a test can observe a request in flight.
#[derive(Default)]
pub struct ReplyGate {
    entered: Notify,
    release: Notify,
}

impl ReplyGate {
    /// Resolves once a send is waiting at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one waiting send continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Replies with canned markdown and records every message it receives.
#[derive(Default)]
pub struct MockChatProvider {
    start_failure: Option<String>,
    send_failure: Option<ProviderError>,
    gate: Option<Arc<ReplyGate>>,
    sent: Mutex<Vec<Vec<MessagePart>>>,
}

impl MockChatProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with `error`.
    pub fn failing_with(mut self, error: ProviderError) -> Self {
        self.send_failure = Some(error);
        self
    }

    /// Session creation fails with a `NotConfigured` error.
    pub fn failing_start(mut self, message: impl Into<String>) -> Self {
        self.start_failure = Some(message.into());
        self
    }

    /// Every send waits at `gate` before replying.
    pub fn with_gate(mut self, gate: Arc<ReplyGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Messages received so far, in order.
    pub fn sent_messages(&self) -> Vec<Vec<MessagePart>> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    fn reply_for(session: &ChatSession, parts: &[MessagePart]) -> String {
        let images = parts.iter().filter(|part| part.is_image()).count();
        if images > 0 {
            return format!(
                "# Foundation Estimate\n\n\
                 Analyzed {} plan image(s).\n\n\
                 | Item | Quantity |\n\
                 |------|----------|\n\
                 | Footing concrete | 12.4 cu yd |\n\
                 | Wall concrete | 18.9 cu yd |\n",
                images
            );
        }

        let question = parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(text.as_str()),
                MessagePart::InlineImage { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "Regarding \"{}\": the figures above assume 8\" walls. (turn {})",
            question.trim(),
            session.history().len() / 2 + 1
        )
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_chat(&self) -> Result<ChatSession, ProviderError> {
        match &self.start_failure {
            Some(message) => Err(ProviderError::NotConfigured(message.clone())),
            None => Ok(ChatSession::new("mock-model")),
        }
    }

    async fn send_message(
        &self,
        session: &mut ChatSession,
        parts: Vec<MessagePart>,
    ) -> Result<String, ProviderError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(parts.clone());
        }

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if let Some(error) = &self.send_failure {
            return Err(error.clone());
        }

        let reply = Self::reply_for(session, &parts);
        session.record_exchange(parts, &reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_mentions_image_count() {
        let provider = MockChatProvider::new();
        let mut session = provider.start_chat().await.unwrap();

        let image = MessagePart::InlineImage {
            mime_type: "image/jpeg".to_string(),
            data: String::new(),
        };
        let reply = provider
            .send_message(&mut session, vec![MessagePart::text("go"), image.clone(), image])
            .await
            .unwrap();

        assert!(reply.contains("Analyzed 2 plan image(s)"));
        assert_eq!(session.history().len(), 2);
        assert_eq!(provider.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_history_untouched() {
        let provider =
            MockChatProvider::new().failing_with(ProviderError::QuotaExceeded("slow down".into()));
        let mut session = provider.start_chat().await.unwrap();

        let err = provider.send_text(&mut session, "hello").await.unwrap_err();

        assert_eq!(err, ProviderError::QuotaExceeded("slow down".into()));
        assert!(session.history().is_empty());
        assert_eq!(provider.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_gate_holds_reply_until_released() {
        let gate = Arc::new(ReplyGate::default());
        let provider = Arc::new(MockChatProvider::new().with_gate(gate.clone()));
        let mut session = provider.start_chat().await.unwrap();

        let sender = provider.clone();
        let reply = tokio::spawn(async move { sender.send_text(&mut session, "hello").await });
        gate.wait_entered().await;
        assert!(!reply.is_finished());

        gate.release();
        assert!(reply.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failing_start() {
        let provider = MockChatProvider::new().failing_start("no key");
        assert!(matches!(
            provider.start_chat().await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
