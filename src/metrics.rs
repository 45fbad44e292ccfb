use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all track processor metrics
const PREFIX: &str = "track_processor";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Job Metrics
    pub static ref JOBS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_total"), "Processing runs by outcome"),
        &["outcome"]
    ).expect("Failed to create jobs_total metric");

    pub static ref JOBS_IN_FLIGHT: Gauge = Gauge::new(
        format!("{PREFIX}_jobs_in_flight"),
        "Jobs currently owned by this worker"
    ).expect("Failed to create jobs_in_flight metric");

    pub static ref STALE_JOBS_RECLAIMED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_stale_jobs_reclaimed_total"),
        "Processing jobs failed after their lease expired"
    ).expect("Failed to create stale_jobs_reclaimed_total metric");

    // Stage Metrics
    pub static ref STAGE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_stage_duration_seconds"),
            "Pipeline stage duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 600.0]),
        &["stage"]
    ).expect("Failed to create stage_duration_seconds metric");

    pub static ref STAGE_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_stage_failures_total"), "Pipeline stage failures"),
        &["stage", "class"]
    ).expect("Failed to create stage_failures_total metric");

    pub static ref RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_retries_total"), "Retried storage operations"),
        &["operation"]
    ).expect("Failed to create retries_total metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(JOBS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_IN_FLIGHT.clone()));
    let _ = REGISTRY.register(Box::new(STALE_JOBS_RECLAIMED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STAGE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(STAGE_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RETRIES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_job_outcome(outcome: &str) {
    JOBS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_stage_duration(stage: &str, duration: Duration) {
    STAGE_DURATION_SECONDS
        .with_label_values(&[stage])
        .observe(duration.as_secs_f64());
}

pub fn record_stage_failure(stage: &str, class: &str) {
    STAGE_FAILURES_TOTAL.with_label_values(&[stage, class]).inc();
}

pub fn record_retry(operation: &str) {
    RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_stale_reclaimed(count: usize) {
    STALE_JOBS_RECLAIMED_TOTAL.inc_by(count as u64);
}

/// Tracks a job in flight until dropped.
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn new() -> Self {
        JOBS_IN_FLIGHT.inc();
        Self
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        JOBS_IN_FLIGHT.dec();
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
