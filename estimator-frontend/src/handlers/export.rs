use crate::models::CurrentWorkspace;
use axum::{http::header, response::IntoResponse};

pub const EXPORT_FILE_NAME: &str = "foundation_estimate.txt";

/// Download the conversation as plain text.
pub async fn export_transcript(current: CurrentWorkspace) -> impl IntoResponse {
    let workspace = current.read().await;
    let body = workspace.transcript().export();

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILE_NAME),
            ),
        ],
        body,
    )
}
