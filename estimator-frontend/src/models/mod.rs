pub mod current;
pub mod transcript;
pub mod workspace;

pub use current::CurrentWorkspace;
pub use transcript::{EntryStatus, Role, Transcript, TranscriptEntry};
pub use workspace::{
    ImagePreview, Notice, NoticeLevel, UploadedImage, Workspace, WorkspaceError, WorkspacePhase,
    WorkspaceRegistry,
};
