use crate::models::{CurrentWorkspace, NoticeLevel};
use crate::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Redirect},
    Form,
};
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Deserialize)]
pub struct ChatForm {
    #[serde(default)]
    pub message: String,
}

pub async fn analyze_handler(
    State(state): State<AppState>,
    current: CurrentWorkspace,
) -> Result<impl IntoResponse, AppError> {
    let mut workspace = current.acquire()?;
    let estimator = state.estimator_for(&workspace);

    if let Err(e) = workspace.run_analysis(&estimator).await {
        workspace.set_notice(NoticeLevel::Error, e.to_string());
    }

    Ok(Redirect::to("/"))
}

pub async fn chat_handler(
    State(state): State<AppState>,
    current: CurrentWorkspace,
    Form(payload): Form<ChatForm>,
) -> Result<impl IntoResponse, AppError> {
    let mut workspace = current.acquire()?;
    let estimator = state.estimator_for(&workspace);

    if let Err(e) = workspace.ask(&estimator, &payload.message).await {
        workspace.set_notice(NoticeLevel::Error, e.to_string());
    }

    Ok(Redirect::to("/"))
}

pub async fn reset_handler(
    State(state): State<AppState>,
    current: CurrentWorkspace,
) -> Result<impl IntoResponse, AppError> {
    let mut workspace = current.acquire()?;
    let estimator = state.estimator_for(&workspace);

    workspace.reset(&estimator).await;
    if workspace.session().is_some() {
        workspace.set_notice(NoticeLevel::Info, "Chat history cleared.");
    } else {
        workspace.set_notice(
            NoticeLevel::Error,
            "Chat history cleared, but a new chat session could not be started. Check your Gemini API key.",
        );
    }

    Ok(Redirect::to("/"))
}
