pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod prompts;
pub mod services;
pub mod startup;

use config::Settings;
use models::{Workspace, WorkspaceRegistry};
use prompts::{PromptCatalog, PromptTemplate};
use services::estimator::Estimator;
use services::providers::ProviderFactory;
use std::sync::Arc;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub providers: ProviderFactory,
    pub workspaces: WorkspaceRegistry,
    pub template: &'static PromptTemplate,
}

impl AppState {
    pub fn new(settings: Settings, providers: ProviderFactory) -> Self {
        let template = PromptCatalog::get(&settings.estimator.prompt_template)
            .unwrap_or_else(PromptCatalog::default_template);

        Self {
            settings: Arc::new(settings),
            providers,
            workspaces: WorkspaceRegistry::new(),
            template,
        }
    }

    /// Estimator bound to the workspace's API key override, if any.
    pub fn estimator_for(&self, workspace: &Workspace) -> Estimator {
        Estimator::new(
            self.providers.provider_for(workspace.api_key_override()),
            self.template,
            self.settings.estimator.max_image_dimension,
        )
    }
}
