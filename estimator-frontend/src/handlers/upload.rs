use crate::models::{CurrentWorkspace, NoticeLevel, UploadedImage};
use crate::services::imaging::{self, PREVIEW_DIMENSION};
use crate::AppState;
use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
};
use service_core::error::AppError;

/// Human-readable form of the upload limit.
fn format_limit(bytes: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if bytes >= MIB {
        format!("{} MB", bytes / MIB)
    } else {
        format!("{} KB", bytes.div_ceil(1024))
    }
}

fn is_too_large(error: &MultipartError) -> bool {
    error.status() == StatusCode::PAYLOAD_TOO_LARGE
}

/// Decode a file and build its on-page preview.
fn decode(file_name: String, data: Vec<u8>) -> Result<UploadedImage, imaging::ImageError> {
    let image = imaging::decode_upload(&data, &file_name)?;
    let preview_data_url = imaging::preview_data_url(&image, PREVIEW_DIMENSION)?;
    Ok(UploadedImage {
        file_name,
        image,
        preview_data_url,
    })
}

pub async fn upload_handler(
    State(state): State<AppState>,
    current: CurrentWorkspace,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut workspace = current.acquire()?;
    let max_upload_bytes = state.settings.estimator.max_upload_bytes;
    let mut uploads = Vec::new();
    let mut errors = Vec::new();
    let mut too_large = false;

    // Process every file in the form
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if is_too_large(&e) => {
                too_large = true;
                break;
            }
            Err(e) => {
                return Err(AppError::BadRequest(anyhow::anyhow!("Invalid upload: {}", e)));
            }
        };

        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        // Browsers send an empty part when no file was chosen
        if file_name.is_empty() {
            continue;
        }

        if !imaging::is_supported_upload(&file_name, field.content_type()) {
            errors.push(format!("{}: only PNG and JPEG images are supported", file_name));
            continue;
        }

        let data = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) if is_too_large(&e) => {
                too_large = true;
                break;
            }
            Err(e) => {
                tracing::error!(file_name = %file_name, error = %e, "Failed to read upload");
                errors.push(format!("{}: failed to read file", file_name));
                continue;
            }
        };

        let name = file_name.clone();
        match tokio::task::spawn_blocking(move || decode(name, data)).await {
            Ok(Ok(upload)) => uploads.push(upload),
            Ok(Err(e)) => {
                tracing::warn!(file_name = %file_name, error = %e, "Rejected upload");
                errors.push(e.to_string());
            }
            Err(e) => {
                tracing::error!(file_name = %file_name, error = %e, "Image decoding task failed");
                errors.push(format!("{}: failed to decode image", file_name));
            }
        }
    }

    if too_large {
        tracing::warn!(
            workspace_id = %workspace.id(),
            max_upload_bytes,
            "Upload exceeds size limit"
        );
        workspace.set_notice(
            NoticeLevel::Error,
            format!(
                "Upload rejected: the files exceed the {} limit. Upload fewer or smaller images.",
                format_limit(max_upload_bytes)
            ),
        );
        return Ok(Redirect::to("/"));
    }

    let uploaded = uploads.len();
    if uploaded > 0 {
        if let Err(e) = workspace.store_uploads(uploads) {
            workspace.set_notice(NoticeLevel::Error, e.to_string());
            return Ok(Redirect::to("/"));
        }
    }

    tracing::info!(
        workspace_id = %workspace.id(),
        uploaded,
        rejected = errors.len(),
        "Upload processed"
    );

    if errors.is_empty() && uploaded == 0 {
        workspace.set_notice(NoticeLevel::Error, "Choose at least one plan image to upload.");
    } else if errors.is_empty() {
        workspace.set_notice(
            NoticeLevel::Info,
            format!("{} plan image(s) uploaded", uploaded),
        );
    } else {
        workspace.set_notice(
            NoticeLevel::Error,
            format!(
                "{} plan image(s) uploaded, {} rejected: {}",
                uploaded,
                errors.len(),
                errors.join("; ")
            ),
        );
    }

    Ok(Redirect::to("/"))
}
