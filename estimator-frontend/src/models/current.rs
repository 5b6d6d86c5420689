use crate::models::Workspace;
use crate::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tower_sessions::Session;
use uuid::Uuid;

const WORKSPACE_ID_KEY: &str = "workspace_id";

/// The caller's workspace, resolved from the cookie session
pub struct CurrentWorkspace {
    pub id: Uuid,
    pub handle: Arc<Mutex<Workspace>>,
}

impl CurrentWorkspace {
    /// Exclusive access for an action. Fails while another action on the
    /// same workspace is still running.
    pub fn acquire(&self) -> Result<OwnedMutexGuard<Workspace>, AppError> {
        let mut guard = self.handle.clone().try_lock_owned().map_err(|_| {
            tracing::warn!(workspace_id = %self.id, "Workspace busy, rejecting action");
            AppError::Conflict(anyhow::anyhow!(
                "A request is already in progress for this workspace. Please wait for it to finish."
            ))
        })?;
        guard.touch();
        Ok(guard)
    }

    /// Access for rendering; waits for a running action to finish.
    pub async fn read(&self) -> tokio::sync::MutexGuard<'_, Workspace> {
        let mut guard = self.handle.lock().await;
        guard.touch();
        guard
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentWorkspace {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| AppError::InternalError(anyhow::anyhow!(message)))?;

        let stored: Option<Uuid> = session
            .get(WORKSPACE_ID_KEY)
            .await
            .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;

        let (id, handle) = state.workspaces.get_or_create(stored);

        if stored != Some(id) {
            session
                .insert(WORKSPACE_ID_KEY, id)
                .await
                .map_err(|e| AppError::InternalError(anyhow::Error::new(e)))?;
        }

        Ok(CurrentWorkspace { id, handle })
    }
}
