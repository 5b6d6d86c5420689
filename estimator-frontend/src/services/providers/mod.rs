//! Chat model abstractions and implementations.
//!
//! The estimator talks to the remote model through exactly three operations:
//! create a session, send a multimodal message, send a text message.

pub mod gemini;
pub mod mock;

use crate::config::{ProviderKind, Settings};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Error type for provider operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error: {0}")]
    ApiError(String),
}

/// Author of a turn in the remote conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Model,
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Text(String),
    /// Base64-encoded image bytes.
    InlineImage { mime_type: String, data: String },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text(text.into())
    }

    pub fn is_image(&self) -> bool {
        matches!(self, MessagePart::InlineImage { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub parts: Vec<MessagePart>,
}

/// Handle to a remote conversation.
///
/// The REST API is stateless, so the handle carries the history that is
/// replayed with every message. History only grows when a send succeeds.
#[derive(Debug, Clone)]
pub struct ChatSession {
    id: Uuid,
    model: String,
    history: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Append a completed request/reply pair.
    pub fn record_exchange(&mut self, request: Vec<MessagePart>, reply: &str) {
        self.history.push(ChatTurn {
            role: ChatRole::User,
            parts: request,
        });
        self.history.push(ChatTurn {
            role: ChatRole::Model,
            parts: vec![MessagePart::text(reply)],
        });
    }
}

/// Trait for conversational model backends (e.g., Gemini).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Create a session with empty history.
    async fn start_chat(&self) -> Result<ChatSession, ProviderError>;

    /// Send a multimodal user message on `session` and return the reply text.
    async fn send_message(
        &self,
        session: &mut ChatSession,
        parts: Vec<MessagePart>,
    ) -> Result<String, ProviderError>;

    /// Send a plain text user message on `session`.
    async fn send_text(&self, session: &mut ChatSession, text: &str) -> Result<String, ProviderError> {
        self.send_message(session, vec![MessagePart::text(text)]).await
    }
}

/// Builds the provider for a workspace, honouring a per-user API key override.
#[derive(Clone)]
pub enum ProviderFactory {
    Gemini {
        settings: crate::config::GeminiSettings,
        client: reqwest::Client,
        default: Arc<dyn ChatProvider>,
    },
    /// Always the same provider; overrides are ignored.
    Fixed(Arc<dyn ChatProvider>),
}

impl ProviderFactory {
    pub fn from_settings(settings: &Settings) -> Result<Self, ProviderError> {
        match settings.estimator.provider {
            ProviderKind::Mock => Ok(ProviderFactory::Fixed(Arc::new(mock::MockChatProvider::new()))),
            ProviderKind::Gemini => {
                let client = gemini::build_client(settings.gemini.timeout_seconds)?;
                let default = gemini::GeminiChatProvider::with_client(
                    gemini::GeminiConfig::from_settings(&settings.gemini, None),
                    client.clone(),
                );
                Ok(ProviderFactory::Gemini {
                    settings: settings.gemini.clone(),
                    client,
                    default: Arc::new(default),
                })
            }
        }
    }

    pub fn fixed(provider: Arc<dyn ChatProvider>) -> Self {
        ProviderFactory::Fixed(provider)
    }

    /// The provider for a workspace; `api_key_override` replaces the configured key.
    pub fn provider_for(&self, api_key_override: Option<&Secret<String>>) -> Arc<dyn ChatProvider> {
        match self {
            ProviderFactory::Fixed(provider) => provider.clone(),
            ProviderFactory::Gemini {
                settings,
                client,
                default,
            } => match api_key_override.filter(|key| !key.expose_secret().trim().is_empty()) {
                Some(key) => Arc::new(gemini::GeminiChatProvider::with_client(
                    gemini::GeminiConfig::from_settings(settings, Some(key.clone())),
                    client.clone(),
                )),
                None => default.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_exchange_appends_user_then_model() {
        let mut session = ChatSession::new("gemini-test");
        session.record_exchange(vec![MessagePart::text("hello")], "hi there");

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].role, ChatRole::Model);
        assert_eq!(history[1].parts, vec![MessagePart::text("hi there")]);
    }

    #[test]
    fn test_sessions_have_distinct_ids() {
        assert_ne!(ChatSession::new("m").id(), ChatSession::new("m").id());
    }

    #[tokio::test]
    async fn test_fixed_factory_ignores_override() {
        let factory = ProviderFactory::fixed(Arc::new(mock::MockChatProvider::new()));
        let provider = factory.provider_for(Some(&Secret::new("override".to_string())));
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn test_gemini_factory_uses_override_key() {
        let settings = Settings::default();
        let factory = ProviderFactory::from_settings(&settings).unwrap();

        // No configured key: the default provider cannot start a session.
        let default = factory.provider_for(None);
        assert!(matches!(
            default.start_chat().await,
            Err(ProviderError::NotConfigured(_))
        ));

        let overridden = factory.provider_for(Some(&Secret::new("user-key".to_string())));
        assert!(overridden.start_chat().await.is_ok());
    }
}
