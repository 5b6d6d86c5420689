use crate::models::{CurrentWorkspace, NoticeLevel};
use crate::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Redirect},
    Form,
};
use secrecy::Secret;
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Deserialize)]
pub struct ApiKeyForm {
    #[serde(default)]
    pub api_key: String,
}

/// Set the interactive API key for this browser, or clear it with a blank value.
pub async fn api_key_handler(
    State(state): State<AppState>,
    current: CurrentWorkspace,
    Form(payload): Form<ApiKeyForm>,
) -> Result<impl IntoResponse, AppError> {
    let mut workspace = current.acquire()?;

    let api_key = payload.api_key.trim();
    let cleared = api_key.is_empty();
    workspace.set_api_key_override((!cleared).then(|| Secret::new(api_key.to_string())));

    let estimator = state.estimator_for(&workspace);
    let ready = workspace.ensure_session(&estimator).await;

    tracing::info!(
        workspace_id = %workspace.id(),
        override_set = !cleared,
        session_ready = ready,
        "API key updated"
    );

    match (cleared, ready) {
        (false, true) => workspace.set_notice(NoticeLevel::Info, "API key saved."),
        (true, true) => workspace.set_notice(NoticeLevel::Info, "Using the server's API key."),
        (_, false) => workspace.set_notice(
            NoticeLevel::Error,
            "No chat session could be started. Enter a valid Gemini API key.",
        ),
    }

    Ok(Redirect::to("/"))
}
