use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Upper-case tag used in the exported transcript.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Reply,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub status: EntryStatus,
}

impl TranscriptEntry {
    pub fn is_error(&self) -> bool {
        self.status == EntryStatus::Error
    }
}

/// Ordered conversation log. Append-only until cleared.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into(), EntryStatus::Reply);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into(), EntryStatus::Reply);
    }

    /// An assistant entry carrying a failure message.
    pub fn push_error(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into(), EntryStatus::Error);
    }

    fn push(&mut self, role: Role, content: String, status: EntryStatus) {
        self.entries.push(TranscriptEntry {
            role,
            content,
            status,
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Plain-text rendering: `ROLE: content` per entry, separated by a blank line.
    pub fn export(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}: {}", entry.role.label(), entry.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
