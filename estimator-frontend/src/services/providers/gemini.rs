//! Gemini chat provider.
//!
//! Implements multi-turn multimodal chat on top of the stateless
//! `generateContent` REST method by replaying the session history.

use super::{ChatProvider, ChatRole, ChatSession, MessagePart, ProviderError};
use crate::config::GeminiSettings;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gemini provider configuration.
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: Option<Secret<String>>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl GeminiConfig {
    pub fn from_settings(settings: &GeminiSettings, api_key_override: Option<Secret<String>>) -> Self {
        Self {
            api_key: api_key_override.or_else(|| settings.api_key.clone()),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            top_k: settings.top_k,
            max_output_tokens: settings.max_output_tokens,
        }
    }
}

pub fn build_client(timeout_seconds: u64) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {}", e)))
}

/// Gemini chat provider.
pub struct GeminiChatProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiChatProvider {
    pub fn with_client(config: GeminiConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.config
            .api_key
            .as_ref()
            .map(|key| key.expose_secret().trim())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("Gemini API key not configured".to_string()))
    }

    fn api_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.config.api_base, model)
    }

    /// Request body: the session history followed by the new user turn.
    fn build_request(&self, session: &ChatSession, parts: &[MessagePart]) -> GenerateContentRequest {
        let mut contents: Vec<Content> = session
            .history()
            .iter()
            .map(|turn| Content::from_parts(turn.role, &turn.parts))
            .collect();
        contents.push(Content::from_parts(ChatRole::User, parts));

        GenerateContentRequest {
            contents,
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiChatProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn start_chat(&self) -> Result<ChatSession, ProviderError> {
        self.api_key()?;
        Ok(ChatSession::new(self.config.model.clone()))
    }

    async fn send_message(
        &self,
        session: &mut ChatSession,
        parts: Vec<MessagePart>,
    ) -> Result<String, ProviderError> {
        let api_key = self.api_key()?;
        let request = self.build_request(session, &parts);

        tracing::debug!(
            model = %session.model(),
            session_id = %session.id(),
            history_turns = session.history().len(),
            image_count = parts.iter().filter(|part| part.is_image()).count(),
            "Sending request to Gemini API"
        );

        let response = self
            .client
            .post(self.api_url(session.model()))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &error_text));
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))?;

        let text = extract_text(api_response)?;

        if let Some(usage) = &text.usage {
            tracing::debug!(
                session_id = %session.id(),
                input_tokens = usage.prompt_token_count.unwrap_or(0),
                output_tokens = usage.candidates_token_count.unwrap_or(0),
                "Gemini response received"
            );
        }

        session.record_exchange(parts, &text.text);
        Ok(text.text)
    }
}

/// Map a non-success HTTP response onto the provider error taxonomy.
pub(crate) fn classify_error(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            }
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::QuotaExceeded(message),
        StatusCode::BAD_REQUEST if message.to_lowercase().contains("api key") => {
            ProviderError::Authentication(message)
        }
        StatusCode::BAD_REQUEST => ProviderError::InvalidRequest(message),
        _ => ProviderError::ApiError(format!("Gemini API error {}: {}", status, message)),
    }
}

struct ExtractedText {
    text: String,
    usage: Option<UsageMetadata>,
}

/// Join the text parts of the first candidate, as the reply text.
fn extract_text(response: GenerateContentResponse) -> Result<ExtractedText, ProviderError> {
    let usage = response.usage_metadata;

    let Some(candidate) = response.candidates.into_iter().next() else {
        if let Some(reason) = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(ProviderError::ContentFiltered(format!(
                "Prompt blocked: {}",
                reason
            )));
        }
        return Err(ProviderError::ApiError(
            "Gemini returned no candidates".to_string(),
        ));
    };

    let text: String = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(text),
            ContentPart::InlineData { .. } => None,
        })
        .collect();

    match candidate.finish_reason.as_deref() {
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") if text.is_empty() => {
            Err(ProviderError::ContentFiltered(
                "Response blocked by safety filters".to_string(),
            ))
        }
        _ if text.is_empty() => Err(ProviderError::ApiError(
            "Gemini returned an empty response".to_string(),
        )),
        _ => Ok(ExtractedText { text, usage }),
    }
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

impl Content {
    fn from_parts(role: ChatRole, parts: &[MessagePart]) -> Self {
        let role = match role {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        };
        Self {
            role: Some(role.to_string()),
            parts: parts.iter().map(ContentPart::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl From<&MessagePart> for ContentPart {
    fn from(part: &MessagePart) -> Self {
        match part {
            MessagePart::Text(text) => ContentPart::Text { text: text.clone() },
            MessagePart::InlineImage { mime_type, data } => ContentPart::InlineData {
                inline_data: InlineData {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}
