use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    make_request_span, request_id_middleware, security_headers_middleware,
};
use time::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::handlers::{
    app::{health_check, index},
    estimate::{analyze_handler, chat_handler, reset_handler},
    export::export_transcript,
    metrics::metrics,
    settings::api_key_handler,
    upload::upload_handler,
};
use crate::middleware::metrics_middleware;
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    // Bounded by MAX_WORKSPACE_IDLE_MINUTES, so the conversion cannot overflow
    let idle_minutes = i64::try_from(state.settings.estimator.idle_minutes()).unwrap_or(1);

    // Session setup
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // Set to true in production with HTTPS
        .with_expiry(Expiry::OnInactivity(Duration::minutes(idle_minutes)));

    let static_dir = state.settings.server.static_dir.clone();
    let max_upload_bytes = state.settings.estimator.max_upload_bytes;

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/uploads", post(upload_handler))
        .route("/analyze", post(analyze_handler))
        .route("/chat", post(chat_handler))
        .route("/reset", post(reset_handler))
        .route("/settings/api-key", post(api_key_handler))
        .route("/transcript.txt", get(export_transcript))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(session_layer)
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::extract::Request| make_request_span(request)),
        )
        // Outermost so the span sees the request id
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
