use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static MODEL_CALLS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static MODEL_CALL_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

/// Register all collectors. Calling it again is a no-op.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;

    let request_duration = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;

    let model_calls = IntCounterVec::new(
        Opts::new(
            "estimator_model_calls_total",
            "Total number of calls to the chat model",
        ),
        &["operation", "outcome"],
    )?;

    let model_duration = HistogramVec::new(
        HistogramOpts::new(
            "estimator_model_call_duration_seconds",
            "Chat model call duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0]),
        &["operation"],
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(request_duration.clone()))?;
    registry.register(Box::new(model_calls.clone()))?;
    registry.register(Box::new(model_duration.clone()))?;

    // Initialize globals
    let _ = REGISTRY.set(registry);
    let _ = HTTP_REQUESTS_TOTAL.set(requests_total);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(request_duration);
    let _ = MODEL_CALLS_TOTAL.set(model_calls);
    let _ = MODEL_CALL_DURATION_SECONDS.set(model_duration);

    Ok(())
}

pub fn record_http_request(method: &str, path: &str, status: &str, seconds: f64) {
    let labels = [method, path, status];
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&labels).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION_SECONDS.get() {
        histogram.with_label_values(&labels).observe(seconds);
    }
}

/// `outcome` is `success` or a failure kind label.
pub fn record_model_call(operation: &str, outcome: &str, seconds: f64) {
    if let Some(counter) = MODEL_CALLS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
    if let Some(histogram) = MODEL_CALL_DURATION_SECONDS.get() {
        histogram.with_label_values(&[operation]).observe(seconds);
    }
}

/// Text exposition of the registry; empty until `init_metrics` ran.
pub fn get_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return String::new();
    };

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
