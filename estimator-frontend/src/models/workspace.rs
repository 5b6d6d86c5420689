//! Per-browser state: chat session, transcript and uploaded plans.

use crate::models::transcript::Transcript;
use crate::services::estimator::Estimator;
use crate::services::providers::ChatSession;
use dashmap::DashMap;
use image::DynamicImage;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("Chat session is not ready. Check your Gemini API key and try again.")]
    SessionUnavailable,

    #[error("Upload at least one plan image first.")]
    NoImages,

    #[error("These plans have already been analyzed. Clear the chat history to start over.")]
    AlreadyAnalyzed,

    #[error("Generate an estimate before asking questions.")]
    NotAnalyzed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspacePhase {
    NoSession,
    AwaitingFirstAnalysis,
    ConversationReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// One-shot message shown on the next page render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// A decoded upload, before analysis.
pub struct UploadedImage {
    pub file_name: String,
    pub image: DynamicImage,
    pub preview_data_url: String,
}

#[derive(Debug, Clone)]
pub struct ImagePreview {
    pub file_name: String,
    pub caption: String,
    pub data_url: String,
}

pub struct Workspace {
    id: Uuid,
    session: Option<ChatSession>,
    transcript: Transcript,
    images: Arc<[DynamicImage]>,
    previews: Vec<ImagePreview>,
    images_analyzed: bool,
    api_key_override: Option<Secret<String>>,
    notice: Option<Notice>,
    last_active: Instant,
}

impl Workspace {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            session: None,
            transcript: Transcript::new(),
            images: Arc::from(Vec::new()),
            previews: Vec::new(),
            images_analyzed: false,
            api_key_override: None,
            notice: None,
            last_active: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> Option<&ChatSession> {
        self.session.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn previews(&self) -> &[ImagePreview] {
        &self.previews
    }

    pub fn pending_image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images_analyzed(&self) -> bool {
        self.images_analyzed
    }

    pub fn api_key_override(&self) -> Option<&Secret<String>> {
        self.api_key_override.as_ref()
    }

    pub fn phase(&self) -> WorkspacePhase {
        match (&self.session, self.images_analyzed) {
            (None, _) => WorkspacePhase::NoSession,
            (Some(_), false) => WorkspacePhase::AwaitingFirstAnalysis,
            (Some(_), true) => WorkspacePhase::ConversationReady,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn set_notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notice = Some(Notice {
            level,
            message: message.into(),
        });
    }

    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    /// Create a chat session if there is none. Returns whether one exists afterwards.
    pub async fn ensure_session(&mut self, estimator: &Estimator) -> bool {
        if self.session.is_none() {
            self.session = estimator.start_session().await;
        }
        self.session.is_some()
    }

    /// Replace the current upload set.
    pub fn store_uploads(&mut self, uploads: Vec<UploadedImage>) -> Result<(), WorkspaceError> {
        if self.images_analyzed {
            return Err(WorkspaceError::AlreadyAnalyzed);
        }
        if uploads.is_empty() {
            return Err(WorkspaceError::NoImages);
        }

        self.previews = uploads
            .iter()
            .enumerate()
            .map(|(index, upload)| ImagePreview {
                file_name: upload.file_name.clone(),
                caption: format!("Plan Image {}", index + 1),
                data_url: upload.preview_data_url.clone(),
            })
            .collect();
        self.images = uploads
            .into_iter()
            .map(|upload| upload.image)
            .collect::<Vec<_>>()
            .into();

        tracing::info!(
            workspace_id = %self.id,
            image_count = self.images.len(),
            "Plan images stored"
        );
        Ok(())
    }

    /// Request the estimate report for the stored uploads.
    ///
    /// Appends exactly one assistant entry. The images are released and the
    /// workspace is marked analysed only when the report arrives, so a failed
    /// attempt can be retried.
    pub async fn run_analysis(&mut self, estimator: &Estimator) -> Result<(), WorkspaceError> {
        if self.images_analyzed {
            return Err(WorkspaceError::AlreadyAnalyzed);
        }
        if self.images.is_empty() {
            return Err(WorkspaceError::NoImages);
        }
        if !self.ensure_session(estimator).await {
            return Err(WorkspaceError::SessionUnavailable);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(WorkspaceError::SessionUnavailable);
        };

        match estimator.analyze(self.images.clone(), session).await {
            Ok(report) => {
                self.transcript.push_assistant(report);
                self.images_analyzed = true;
                self.images = Arc::from(Vec::new());
            }
            Err(e) => self.transcript.push_error(e.to_string()),
        }
        Ok(())
    }

    /// Ask a follow-up question. Blank input is ignored.
    pub async fn ask(&mut self, estimator: &Estimator, text: &str) -> Result<(), WorkspaceError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.images_analyzed {
            return Err(WorkspaceError::NotAnalyzed);
        }
        if !self.ensure_session(estimator).await {
            return Err(WorkspaceError::SessionUnavailable);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(WorkspaceError::SessionUnavailable);
        };

        self.transcript.push_user(text);
        match estimator.send_message(session, text).await {
            Ok(reply) => self.transcript.push_assistant(reply),
            Err(e) => self.transcript.push_error(e.to_string()),
        }
        Ok(())
    }

    /// Forget the conversation and uploads, then open a fresh session.
    pub async fn reset(&mut self, estimator: &Estimator) {
        self.transcript.clear();
        self.images = Arc::from(Vec::new());
        self.previews.clear();
        self.images_analyzed = false;
        self.session = None;
        self.session = estimator.start_session().await;

        tracing::info!(
            workspace_id = %self.id,
            session_ready = self.session.is_some(),
            "Workspace reset"
        );
    }

    /// Set or clear the per-user API key.
    ///
    /// The conversation is kept: the provider is picked per request from the
    /// override, and the session history is replayed with whichever key is
    /// current.
    pub fn set_api_key_override(&mut self, api_key: Option<Secret<String>>) {
        self.api_key_override = api_key.filter(|key| !key.expose_secret().trim().is_empty());
    }
}

/// All live workspaces, keyed by the id stored in the browser session.
#[derive(Clone, Default)]
pub struct WorkspaceRegistry {
    workspaces: Arc<DashMap<Uuid, Arc<Mutex<Workspace>>>>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The workspace for `id`, creating a new one when unknown or absent.
    pub fn get_or_create(&self, id: Option<Uuid>) -> (Uuid, Arc<Mutex<Workspace>>) {
        if let Some(id) = id {
            if let Some(existing) = self.workspaces.get(&id) {
                return (id, existing.value().clone());
            }
        }

        let id = id.unwrap_or_else(Uuid::new_v4);
        let workspace = self
            .workspaces
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(Workspace::new(id))))
            .value()
            .clone();
        tracing::debug!(workspace_id = %id, "Workspace created");
        (id, workspace)
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    /// Drop idle workspaces. Workspaces with an action in flight are kept.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let before = self.workspaces.len();
        self.workspaces.retain(|_, workspace| match workspace.try_lock() {
            Ok(guard) => guard.last_active.elapsed() < max_idle,
            Err(_) => true,
        });
        before.saturating_sub(self.workspaces.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transcript::{EntryStatus, Role};
    use crate::prompts::PromptCatalog;
    use crate::services::providers::mock::MockChatProvider;
    use crate::services::providers::ProviderError;
    use image::RgbImage;

    fn estimator(provider: MockChatProvider) -> Estimator {
        Estimator::new(Arc::new(provider), PromptCatalog::default_template(), 64)
    }

    fn upload(name: &str) -> UploadedImage {
        UploadedImage {
            file_name: name.to_string(),
            image: DynamicImage::ImageRgb8(RgbImage::new(16, 12)),
            preview_data_url: "data:image/png;base64,".to_string(),
        }
    }

    #[tokio::test]
    async fn test_phases_follow_the_workflow() {
        let estimator = estimator(MockChatProvider::new());
        let mut workspace = Workspace::new(Uuid::new_v4());
        assert_eq!(workspace.phase(), WorkspacePhase::NoSession);

        assert!(workspace.ensure_session(&estimator).await);
        assert_eq!(workspace.phase(), WorkspacePhase::AwaitingFirstAnalysis);

        workspace
            .store_uploads(vec![upload("a.png"), upload("b.jpg")])
            .unwrap();
        assert_eq!(workspace.previews()[1].caption, "Plan Image 2");

        workspace.run_analysis(&estimator).await.unwrap();
        assert_eq!(workspace.phase(), WorkspacePhase::ConversationReady);
        assert_eq!(workspace.pending_image_count(), 0);
        assert_eq!(workspace.previews().len(), 2);
        assert_eq!(workspace.transcript().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_refused_before_analysis() {
        let estimator = estimator(MockChatProvider::new());
        let mut workspace = Workspace::new(Uuid::new_v4());

        let err = workspace.ask(&estimator, "How deep?").await.unwrap_err();

        assert_eq!(err, WorkspaceError::NotAnalyzed);
        assert!(workspace.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_failed_analysis_can_be_retried() {
        let failing = estimator(
            MockChatProvider::new().failing_with(ProviderError::QuotaExceeded("quota exceeded".into())),
        );
        let mut workspace = Workspace::new(Uuid::new_v4());
        workspace.store_uploads(vec![upload("a.png")]).unwrap();

        workspace.run_analysis(&failing).await.unwrap();

        let entry = &workspace.transcript().entries()[0];
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.status, EntryStatus::Error);
        assert!(entry.content.contains("quota exceeded"));
        assert!(!workspace.images_analyzed());
        assert_eq!(workspace.pending_image_count(), 1);

        workspace
            .run_analysis(&estimator(MockChatProvider::new()))
            .await
            .unwrap();
        assert!(workspace.images_analyzed());
        assert_eq!(workspace.transcript().len(), 2);
    }

    #[tokio::test]
    async fn test_ask_appends_question_and_reply() {
        let estimator = estimator(MockChatProvider::new());
        let mut workspace = Workspace::new(Uuid::new_v4());
        workspace.store_uploads(vec![upload("a.png")]).unwrap();
        workspace.run_analysis(&estimator).await.unwrap();

        workspace.ask(&estimator, "   ").await.unwrap();
        assert_eq!(workspace.transcript().len(), 1);

        workspace.ask(&estimator, "What about drainage?").await.unwrap();
        let entries = workspace.transcript().entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].role, Role::User);
        assert_eq!(entries[1].content, "What about drainage?");
        assert_eq!(entries[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_reset_clears_transcript_and_replaces_session() {
        let estimator = estimator(MockChatProvider::new());
        let mut workspace = Workspace::new(Uuid::new_v4());
        workspace.store_uploads(vec![upload("a.png")]).unwrap();
        workspace.run_analysis(&estimator).await.unwrap();
        workspace.ask(&estimator, "Why?").await.unwrap();
        assert!(workspace.transcript().len() >= 2);
        let old_session = workspace.session().unwrap().id();

        workspace.reset(&estimator).await;

        assert!(workspace.transcript().is_empty());
        assert!(workspace.previews().is_empty());
        assert!(!workspace.images_analyzed());
        assert_ne!(workspace.session().unwrap().id(), old_session);
    }

    #[tokio::test]
    async fn test_session_unavailable() {
        let estimator = estimator(MockChatProvider::new().failing_start("no key"));
        let mut workspace = Workspace::new(Uuid::new_v4());
        workspace.store_uploads(vec![upload("a.png")]).unwrap();

        assert_eq!(
            workspace.run_analysis(&estimator).await,
            Err(WorkspaceError::SessionUnavailable)
        );
        assert!(workspace.transcript().is_empty());
    }

    #[test]
    fn test_uploads_rejected_after_analysis_or_empty() {
        let mut workspace = Workspace::new(Uuid::new_v4());
        assert_eq!(workspace.store_uploads(Vec::new()), Err(WorkspaceError::NoImages));

        workspace.images_analyzed = true;
        assert_eq!(
            workspace.store_uploads(vec![upload("a.png")]),
            Err(WorkspaceError::AlreadyAnalyzed)
        );
    }

    #[test]
    fn test_blank_api_key_override_is_cleared() {
        let mut workspace = Workspace::new(Uuid::new_v4());
        workspace.set_api_key_override(Some(Secret::new("  ".to_string())));
        assert!(workspace.api_key_override().is_none());

        workspace.set_api_key_override(Some(Secret::new("key".to_string())));
        assert!(workspace.api_key_override().is_some());
    }

    #[tokio::test]
    async fn test_key_change_keeps_analysis_context() {
        let estimator = estimator(MockChatProvider::new());
        let mut workspace = Workspace::new(Uuid::new_v4());
        workspace.store_uploads(vec![upload("a.png")]).unwrap();
        workspace.run_analysis(&estimator).await.unwrap();
        let session_id = workspace.session().unwrap().id();
        assert_eq!(workspace.session().unwrap().history().len(), 2);

        workspace.set_api_key_override(Some(Secret::new("new-key".to_string())));
        workspace.ask(&estimator, "How deep?").await.unwrap();

        let session = workspace.session().unwrap();
        assert_eq!(session.id(), session_id);
        assert_eq!(session.history().len(), 4);
        assert_eq!(workspace.phase(), WorkspacePhase::ConversationReady);
        assert!(workspace.transcript().entries()[2].content.contains("(turn 2)"));
    }

    #[tokio::test]
    async fn test_registry_reuses_and_prunes() {
        let registry = WorkspaceRegistry::new();
        let (id, first) = registry.get_or_create(None);
        let (same_id, second) = registry.get_or_create(Some(id));

        assert_eq!(id, same_id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        // A workspace with an action in flight survives pruning.
        let guard = first.try_lock().unwrap();
        assert_eq!(registry.prune_idle(Duration::ZERO), 0);
        drop(guard);

        assert_eq!(registry.prune_idle(Duration::ZERO), 1);
        assert!(registry.is_empty());
    }
}
