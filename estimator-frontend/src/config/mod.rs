use crate::prompts::PromptCatalog;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config::{self as core_config, ServerSettings};
use service_core::error::AppError;

/// Longer-side pixel cap applied to plan images before upload.
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 4096;

/// Upper bound for `estimator.workspace_idle_minutes` (30 days).
pub const MAX_WORKSPACE_IDLE_MINUTES: u64 = 30 * 24 * 60;

#[derive(Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub gemini: GeminiSettings,
    #[serde(default)]
    pub estimator: EstimatorSettings,
}

#[derive(Deserialize, Clone)]
pub struct GeminiSettings {
    /// Falls back to `GEMINI_API_KEY` / `GOOGLE_API_KEY` when absent.
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            timeout_seconds: default_timeout_seconds(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> u32 {
    40
}

fn default_max_output_tokens() -> u32 {
    8192
}

/// Which chat backend answers estimate requests.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    /// Canned offline replies, for demos and tests.
    Mock,
}

#[derive(Deserialize, Clone)]
pub struct EstimatorSettings {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Id of the active prompt template in the catalog.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Workspaces untouched for this long are dropped.
    #[serde(default = "default_workspace_idle_minutes")]
    pub workspace_idle_minutes: u64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            prompt_template: default_prompt_template(),
            max_image_dimension: default_max_image_dimension(),
            max_upload_bytes: default_max_upload_bytes(),
            workspace_idle_minutes: default_workspace_idle_minutes(),
        }
    }
}

impl EstimatorSettings {
    /// Idle period in minutes, clamped to the accepted range.
    pub fn idle_minutes(&self) -> u64 {
        self.workspace_idle_minutes.clamp(1, MAX_WORKSPACE_IDLE_MINUTES)
    }
}

fn default_prompt_template() -> String {
    PromptCatalog::DEFAULT_ID.to_string()
}

fn default_max_image_dimension() -> u32 {
    DEFAULT_MAX_IMAGE_DIMENSION
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_workspace_idle_minutes() -> u64 {
    24 * 60
}

impl Settings {
    /// Reject settings the application cannot start with.
    pub fn validate(&self) -> Result<(), AppError> {
        if PromptCatalog::get(&self.estimator.prompt_template).is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Unknown prompt template '{}' (available: {})",
                self.estimator.prompt_template,
                PromptCatalog::ids().join(", ")
            )));
        }

        if self.estimator.max_image_dimension == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "estimator.max_image_dimension must be greater than zero"
            )));
        }

        if self.estimator.max_upload_bytes == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "estimator.max_upload_bytes must be greater than zero"
            )));
        }

        if !(1..=MAX_WORKSPACE_IDLE_MINUTES).contains(&self.estimator.workspace_idle_minutes) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "estimator.workspace_idle_minutes must be between 1 and {}, got {}",
                MAX_WORKSPACE_IDLE_MINUTES,
                self.estimator.workspace_idle_minutes
            )));
        }

        Ok(())
    }

    /// Whether a non-blank default API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.gemini
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty())
    }
}

pub fn get_configuration() -> Result<Settings, AppError> {
    let configuration_directory = core_config::configuration_directory("estimator-frontend")?;
    let mut settings: Settings = core_config::load_settings(&configuration_directory)?;

    if settings.gemini.api_key.is_none() {
        settings.gemini.api_key = core_config::non_empty_env("GEMINI_API_KEY")
            .or_else(|| core_config::non_empty_env("GOOGLE_API_KEY"))
            .map(Secret::new);
    }

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_generation_config() {
        let settings = Settings::default();
        assert_eq!(settings.gemini.temperature, 1.0);
        assert_eq!(settings.gemini.top_p, 0.95);
        assert_eq!(settings.gemini.top_k, 40);
        assert_eq!(settings.gemini.max_output_tokens, 8192);
        assert_eq!(settings.estimator.max_image_dimension, 4096);
        assert_eq!(settings.estimator.provider, ProviderKind::Gemini);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_unknown_prompt_template_is_rejected() {
        let mut settings = Settings::default();
        settings.estimator.prompt_template = "no-such-template".to_string();

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("no-such-template"));
    }

    #[test]
    fn test_workspace_idle_minutes_bounds() {
        let mut settings = Settings::default();

        settings.estimator.workspace_idle_minutes = 0;
        assert!(settings.validate().is_err());
        assert_eq!(settings.estimator.idle_minutes(), 1);

        settings.estimator.workspace_idle_minutes = i64::MAX as u64;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("workspace_idle_minutes"));
        assert_eq!(settings.estimator.idle_minutes(), MAX_WORKSPACE_IDLE_MINUTES);

        settings.estimator.workspace_idle_minutes = MAX_WORKSPACE_IDLE_MINUTES;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_upload_limit_is_rejected() {
        let mut settings = Settings::default();
        settings.estimator.max_upload_bytes = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        let mut settings = Settings::default();
        assert!(!settings.has_api_key());

        settings.gemini.api_key = Some(Secret::new("   ".to_string()));
        assert!(!settings.has_api_key());

        settings.gemini.api_key = Some(Secret::new("key".to_string()));
        assert!(settings.has_api_key());
    }

    #[test]
    fn test_provider_kind_deserializes_lowercase() {
        let kind: ProviderKind = serde_json::from_str("\"mock\"").unwrap();
        assert_eq!(kind, ProviderKind::Mock);
    }
}
