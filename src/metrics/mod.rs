use anyhow::Result;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

static READY: AtomicBool = AtomicBool::new(false);

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Cycle metrics
    pub static ref CYCLES_TOTAL: IntCounter = IntCounter::new(
        "nanocd_cycles_total",
        "Total number of reconciliation cycles run"
    ).unwrap();

    pub static ref CYCLES_SKIPPED: IntCounter = IntCounter::new(
        "nanocd_cycles_skipped_total",
        "Total number of cycles skipped because the previous one was still running"
    ).unwrap();

    pub static ref CYCLE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "nanocd_cycle_duration_seconds",
            "Time spent in one reconciliation cycle"
        ).buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0])
    ).unwrap();

    pub static ref WORKLOADS_CONFIGURED: IntGauge = IntGauge::new(
        "nanocd_workloads_configured",
        "Number of workloads selected by the configuration"
    ).unwrap();

    // Workload metrics
    pub static ref WORKLOADS_PROCESSED: IntCounter = IntCounter::new(
        "nanocd_workloads_processed_total",
        "Total number of workloads visited by cycles"
    ).unwrap();

    pub static ref WORKLOADS_NOT_FOUND: IntCounter = IntCounter::new(
        "nanocd_workloads_not_found_total",
        "Total number of configured workloads missing from the cluster"
    ).unwrap();

    pub static ref WORKLOAD_READ_FAILURES: IntCounter = IntCounter::new(
        "nanocd_workload_read_failures_total",
        "Total number of failed workload reads"
    ).unwrap();

    pub static ref PATCHES_APPLIED: IntCounter = IntCounter::new(
        "nanocd_patches_applied_total",
        "Total number of image patches accepted by the cluster"
    ).unwrap();

    pub static ref PATCHES_FAILED: IntCounter = IntCounter::new(
        "nanocd_patches_failed_total",
        "Total number of image patches that failed to apply"
    ).unwrap();

    pub static ref PATCHES_NOOP: IntCounter = IntCounter::new(
        "nanocd_patches_noop_total",
        "Total number of patches that matched no live container"
    ).unwrap();

    // Resolution metrics
    pub static ref IMAGES_CHECKED: IntCounter = IntCounter::new(
        "nanocd_images_checked_total",
        "Total number of container images checked against a policy"
    ).unwrap();

    pub static ref RESOLUTIONS_REJECTED: IntCounter = IntCounter::new(
        "nanocd_resolutions_rejected_total",
        "Total number of images that could not be resolved"
    ).unwrap();

    // Registry metrics
    pub static ref REGISTRY_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "nanocd_registry_errors_total",
        "Total number of failed tag listings"
    ).unwrap();

    pub static ref REGISTRY_QUERY_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "nanocd_registry_query_duration_seconds",
            "Time spent listing tags from image registries"
        ).buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0])
    ).unwrap();

    // Notification metrics
    pub static ref NOTIFICATIONS_SENT_TOTAL: IntCounter = IntCounter::new(
        "nanocd_notifications_sent_total",
        "Total number of notifications sent"
    ).unwrap();

    pub static ref NOTIFICATIONS_FAILED_TOTAL: IntCounter = IntCounter::new(
        "nanocd_notifications_failed_total",
        "Total number of notifications that could not be delivered"
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(CYCLES_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(CYCLES_SKIPPED.clone())).ok();
    REGISTRY.register(Box::new(CYCLE_DURATION.clone())).ok();
    REGISTRY
        .register(Box::new(WORKLOADS_CONFIGURED.clone()))
        .ok();
    REGISTRY
        .register(Box::new(WORKLOADS_PROCESSED.clone()))
        .ok();
    REGISTRY
        .register(Box::new(WORKLOADS_NOT_FOUND.clone()))
        .ok();
    REGISTRY
        .register(Box::new(WORKLOAD_READ_FAILURES.clone()))
        .ok();
    REGISTRY.register(Box::new(PATCHES_APPLIED.clone())).ok();
    REGISTRY.register(Box::new(PATCHES_FAILED.clone())).ok();
    REGISTRY.register(Box::new(PATCHES_NOOP.clone())).ok();
    REGISTRY.register(Box::new(IMAGES_CHECKED.clone())).ok();
    REGISTRY
        .register(Box::new(RESOLUTIONS_REJECTED.clone()))
        .ok();
    REGISTRY
        .register(Box::new(REGISTRY_ERRORS_TOTAL.clone()))
        .ok();
    REGISTRY
        .register(Box::new(REGISTRY_QUERY_DURATION.clone()))
        .ok();
    REGISTRY
        .register(Box::new(NOTIFICATIONS_SENT_TOTAL.clone()))
        .ok();
    REGISTRY
        .register(Box::new(NOTIFICATIONS_FAILED_TOTAL.clone()))
        .ok();

    info!("Metrics registered");
}

/// Mark the process ready once the first cycle has finished
pub fn mark_ready() {
    READY.store(true, Ordering::Relaxed);
}

pub fn is_ready() -> bool {
    READY.load(Ordering::Relaxed)
}

pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .layer(TraceLayer::new_for_http())
}

pub async fn start_metrics_server(port: u16) -> Result<JoinHandle<()>> {
    register_metrics();

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting metrics server on {}", addr);

    let app = router();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server failed: {}", e);
        }
    });

    Ok(handle)
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        buffer,
    )
        .into_response()
}

async fn liveness() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn readiness() -> impl IntoResponse {
    if is_ready() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_is_idempotent() {
        register_metrics();
        register_metrics();
        CYCLES_TOTAL.inc();

        let mut buffer = vec![];
        TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("nanocd_cycles_total"));
        assert!(text.contains("nanocd_registry_query_duration_seconds"));
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let response = liveness().await.into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        mark_ready();
        let response = readiness().await.into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
