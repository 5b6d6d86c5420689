use dotenvy::dotenv;
use estimator_frontend::config::get_configuration;
use estimator_frontend::services::providers::ProviderFactory;
use estimator_frontend::startup::build_router;
use estimator_frontend::AppState;
use service_core::config::non_empty_env;
use service_core::observability::logging::init_tracing;
use std::time::Duration;
use tracing::info;

const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let log_level = non_empty_env("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
    let otlp_endpoint = non_empty_env("OTLP_ENDPOINT");
    init_tracing("estimator-frontend", &log_level, otlp_endpoint.as_deref());

    estimator_frontend::services::metrics::init_metrics()
        .map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    if !configuration.has_api_key() {
        tracing::warn!("No Gemini API key configured; users must enter one in the sidebar");
    }

    let providers = ProviderFactory::from_settings(&configuration)
        .map_err(|e| anyhow::anyhow!("Failed to create chat provider: {}", e))?;
    let address = configuration.server.address();
    let idle = configuration
        .estimator
        .idle_minutes()
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("estimator.workspace_idle_minutes is out of range"))?;

    let state = AppState::new(configuration, providers);
    info!(
        template = %state.template.label(),
        provider = ?state.settings.estimator.provider,
        "Estimator configured"
    );

    // Drop workspaces abandoned by their browsers
    let workspaces = state.workspaces.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = workspaces.prune_idle(idle);
            if removed > 0 {
                info!(removed, remaining = workspaces.len(), "Pruned idle workspaces");
            }
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting estimator-frontend on {}", address);
    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
