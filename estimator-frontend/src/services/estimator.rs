//! The estimate workflow against a chat provider.
//!
//! Every remote failure is caught here and returned as an [`EstimateError`];
//! callers never see a provider fault directly.

use crate::prompts::PromptTemplate;
use crate::services::imaging::{prepare_image, ImageError};
use crate::services::metrics;
use crate::services::providers::{ChatProvider, ChatSession, MessagePart, ProviderError};
use image::DynamicImage;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Analyze,
    FollowUp,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Analyze => "analyze",
            Operation::FollowUp => "follow_up",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotConfigured,
    Authentication,
    QuotaExceeded,
    InvalidRequest,
    ContentFiltered,
    Network,
    Provider,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::NotConfigured => "not_configured",
            FailureKind::Authentication => "authentication",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::ContentFiltered => "content_filtered",
            FailureKind::Network => "network",
            FailureKind::Provider => "provider",
        }
    }
}

impl From<&ProviderError> for FailureKind {
    fn from(error: &ProviderError) -> Self {
        match error {
            ProviderError::NotConfigured(_) => FailureKind::NotConfigured,
            ProviderError::Authentication(_) => FailureKind::Authentication,
            ProviderError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            ProviderError::InvalidRequest(_) => FailureKind::InvalidRequest,
            ProviderError::ContentFiltered(_) => FailureKind::ContentFiltered,
            ProviderError::NetworkError(_) => FailureKind::Network,
            ProviderError::ApiError(_) => FailureKind::Provider,
        }
    }
}

/// A failed estimate request, tagged with what was attempted and why it failed.
///
/// `Display` renders the message shown to the user, including a remediation
/// hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimateError {
    pub operation: Operation,
    pub kind: FailureKind,
    pub detail: String,
}

impl EstimateError {
    fn from_provider(operation: Operation, error: &ProviderError) -> Self {
        Self {
            operation,
            kind: FailureKind::from(error),
            detail: error.to_string(),
        }
    }

    fn from_image(error: ImageError) -> Self {
        Self {
            operation: Operation::Analyze,
            kind: FailureKind::InvalidRequest,
            detail: error.to_string(),
        }
    }
}

impl fmt::Display for EstimateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Operation::Analyze => write!(
                f,
                "Error analyzing images: {}\nDetails: Please ensure your API key is valid and you're using supported image formats.",
                self.detail
            ),
            Operation::FollowUp => write!(
                f,
                "Error sending message: {}\nDetails: Please ensure your API key is valid and try again.",
                self.detail
            ),
        }
    }
}

impl std::error::Error for EstimateError {}

/// Ties a chat provider to the active prompt template and image cap.
#[derive(Clone)]
pub struct Estimator {
    provider: Arc<dyn ChatProvider>,
    template: &'static PromptTemplate,
    max_image_dimension: u32,
}

impl Estimator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        template: &'static PromptTemplate,
        max_image_dimension: u32,
    ) -> Self {
        Self {
            provider,
            template,
            max_image_dimension,
        }
    }

    pub fn template(&self) -> &'static PromptTemplate {
        self.template
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Open a fresh conversation, or `None` when the provider refuses.
    pub async fn start_session(&self) -> Option<ChatSession> {
        match self.provider.start_chat().await {
            Ok(session) => {
                tracing::info!(
                    session_id = %session.id(),
                    provider = %self.provider.name(),
                    model = %session.model(),
                    "Chat session started"
                );
                Some(session)
            }
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider.name(),
                    kind = FailureKind::from(&e).label(),
                    error = %e,
                    "Failed to start chat session"
                );
                None
            }
        }
    }

    /// Send the instruction template followed by every plan image.
    ///
    /// On success the session history grows by one exchange; on failure it
    /// is left as it was.
    pub async fn analyze(
        &self,
        images: Arc<[DynamicImage]>,
        session: &mut ChatSession,
    ) -> Result<String, EstimateError> {
        let image_count = images.len();
        let max_dimension = self.max_image_dimension;

        let image_parts = tokio::task::spawn_blocking(move || {
            images
                .iter()
                .map(|image| prepare_image(image, max_dimension).to_inline_part())
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| EstimateError {
            operation: Operation::Analyze,
            kind: FailureKind::InvalidRequest,
            detail: format!("image preparation failed: {}", e),
        })?
        .map_err(EstimateError::from_image)?;

        let mut parts = Vec::with_capacity(image_parts.len() + 1);
        parts.push(MessagePart::text(self.template.text));
        parts.extend(image_parts);

        tracing::info!(
            session_id = %session.id(),
            template = %self.template.label(),
            image_count,
            "Requesting estimate"
        );

        let started = Instant::now();
        let result = self.provider.send_message(session, parts).await;
        self.finish(Operation::Analyze, session, started, result)
    }

    /// Send a plain text follow-up on an existing conversation.
    pub async fn send_message(
        &self,
        session: &mut ChatSession,
        text: &str,
    ) -> Result<String, EstimateError> {
        let started = Instant::now();
        let result = self.provider.send_text(session, text).await;
        self.finish(Operation::FollowUp, session, started, result)
    }

    fn finish(
        &self,
        operation: Operation,
        session: &ChatSession,
        started: Instant,
        result: Result<String, ProviderError>,
    ) -> Result<String, EstimateError> {
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(reply) => {
                metrics::record_model_call(operation.label(), "success", elapsed);
                tracing::info!(
                    session_id = %session.id(),
                    operation = operation.label(),
                    elapsed_seconds = elapsed,
                    reply_chars = reply.len(),
                    "Model reply received"
                );
                Ok(reply)
            }
            Err(e) => {
                let error = EstimateError::from_provider(operation, &e);
                metrics::record_model_call(operation.label(), error.kind.label(), elapsed);
                tracing::error!(
                    session_id = %session.id(),
                    operation = operation.label(),
                    kind = error.kind.label(),
                    error = %e,
                    "Model call failed"
                );
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptCatalog;
    use crate::services::providers::mock::MockChatProvider;
    use image::{GrayImage, RgbImage};

    fn estimator(provider: Arc<MockChatProvider>) -> Estimator {
        Estimator::new(provider, PromptCatalog::default_template(), 64)
    }

    fn plans() -> Arc<[DynamicImage]> {
        vec![
            DynamicImage::ImageRgb8(RgbImage::new(128, 96)),
            DynamicImage::ImageLuma8(GrayImage::new(10, 10)),
        ]
        .into()
    }

    #[tokio::test]
    async fn test_analyze_sends_template_then_images() {
        let provider = Arc::new(MockChatProvider::new());
        let estimator = estimator(provider.clone());
        let mut session = estimator.start_session().await.unwrap();

        let report = estimator.analyze(plans(), &mut session).await.unwrap();

        assert!(report.contains("Analyzed 2 plan image(s)"));
        let sent = provider.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 3);
        assert_eq!(
            sent[0][0],
            MessagePart::text(PromptCatalog::default_template().text)
        );
        assert!(sent[0][1].is_image() && sent[0][2].is_image());
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_quota_failure_is_reported_with_hint() {
        let provider = Arc::new(
            MockChatProvider::new()
                .failing_with(ProviderError::QuotaExceeded("quota exceeded".to_string())),
        );
        let estimator = estimator(provider);
        let mut session = estimator.start_session().await.unwrap();

        let err = estimator.analyze(plans(), &mut session).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::QuotaExceeded);
        let message = err.to_string();
        assert!(message.starts_with("Error analyzing images: "));
        assert!(message.contains("quota exceeded"));
        assert!(message.contains("API key"));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_failure_message() {
        let provider = Arc::new(
            MockChatProvider::new()
                .failing_with(ProviderError::NetworkError("connection reset".to_string())),
        );
        let estimator = estimator(provider);
        let mut session = estimator.start_session().await.unwrap();

        let err = estimator
            .send_message(&mut session, "What about rebar?")
            .await
            .unwrap_err();

        assert_eq!(err.operation, Operation::FollowUp);
        assert_eq!(err.kind, FailureKind::Network);
        assert_eq!(
            err.to_string(),
            "Error sending message: Network error: connection reset\nDetails: Please ensure your API key is valid and try again."
        );
    }

    #[tokio::test]
    async fn test_start_session_failure_yields_none() {
        let provider = Arc::new(MockChatProvider::new().failing_start("missing key"));
        assert!(estimator(provider).start_session().await.is_none());
    }
}
