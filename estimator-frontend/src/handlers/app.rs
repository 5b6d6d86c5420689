use crate::models::{CurrentWorkspace, ImagePreview, NoticeLevel, Role, WorkspacePhase};
use crate::services::markdown::render_markdown;
use crate::AppState;
use askama::Template;
use axum::{extract::State, response::IntoResponse};

/// A transcript entry prepared for display.
pub struct EntryView {
    pub role: &'static str,
    pub is_error: bool,
    pub html: String,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub notice: Option<String>,
    pub notice_is_error: bool,
    pub session_ready: bool,
    pub has_default_key: bool,
    pub has_key_override: bool,
    pub can_upload: bool,
    pub can_analyze: bool,
    pub chat_enabled: bool,
    pub previews: Vec<ImagePreview>,
    pub entries: Vec<EntryView>,
    pub template_label: String,
}

pub async fn index(State(state): State<AppState>, current: CurrentWorkspace) -> impl IntoResponse {
    let mut workspace = current.read().await;

    let estimator = state.estimator_for(&workspace);
    workspace.ensure_session(&estimator).await;

    let notice = workspace.take_notice();
    let phase = workspace.phase();

    let entries = workspace
        .transcript()
        .entries()
        .iter()
        .map(|entry| EntryView {
            role: match entry.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            is_error: entry.is_error(),
            html: render_markdown(&entry.content),
        })
        .collect();

    IndexTemplate {
        notice_is_error: notice
            .as_ref()
            .is_some_and(|notice| notice.level == NoticeLevel::Error),
        notice: notice.map(|notice| notice.message),
        session_ready: phase != WorkspacePhase::NoSession,
        has_default_key: state.settings.has_api_key(),
        has_key_override: workspace.api_key_override().is_some(),
        can_upload: !workspace.images_analyzed(),
        can_analyze: phase == WorkspacePhase::AwaitingFirstAnalysis
            && workspace.pending_image_count() > 0,
        chat_enabled: phase == WorkspacePhase::ConversationReady,
        previews: workspace.previews().to_vec(),
        entries,
        template_label: state.template.label(),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
