//! Versioned instruction templates sent with the first analysis request.
//!
//! The estimating rules live entirely in this text; the code only selects
//! which template is active.

/// A static instruction block. The attached images are its only input.
#[derive(Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    pub id: &'static str,
    pub version: u32,
    pub title: &'static str,
    pub text: &'static str,
}

static TEMPLATES: [PromptTemplate; 3] = [
    PromptTemplate {
        id: "puget-sound-takeoff",
        version: 3,
        title: "Puget Sound quantity take-off",
        text: include_str!("../../prompts/puget-sound-takeoff.md"),
    },
    PromptTemplate {
        id: "puget-sound-cost",
        version: 2,
        title: "Puget Sound take-off with concrete pricing",
        text: include_str!("../../prompts/puget-sound-cost.md"),
    },
    PromptTemplate {
        id: "general-takeoff",
        version: 1,
        title: "Region-neutral quantity take-off",
        text: include_str!("../../prompts/general-takeoff.md"),
    },
];

pub struct PromptCatalog;

impl PromptCatalog {
    pub const DEFAULT_ID: &'static str = "puget-sound-takeoff";

    pub fn get(id: &str) -> Option<&'static PromptTemplate> {
        TEMPLATES.iter().find(|template| template.id == id)
    }

    pub fn ids() -> Vec<&'static str> {
        TEMPLATES.iter().map(|template| template.id).collect()
    }

    pub fn default_template() -> &'static PromptTemplate {
        &TEMPLATES[0]
    }
}

impl PromptTemplate {
    /// `id@vN`, as recorded in logs.
    pub fn label(&self) -> String {
        format!("{}@v{}", self.id, self.version)
    }
}
