//! Prometheus metrics for the subarea server.
//!
//! Covers the coalescing cache (hits, failure hits, coalesced requests) and
//! background builds (started, outcome, duration).

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static BUILDS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "subarea_builds_started_total",
        "Total number of background builds launched",
    )
    .expect("metric creation failed")
});

pub static BUILDS_SUCCEEDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "subarea_builds_succeeded_total",
        "Total number of background builds that produced the requested artifact",
    )
    .expect("metric creation failed")
});

pub static BUILDS_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "subarea_builds_failed_total",
            "Total number of background builds that failed, by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static BUILDS_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "subarea_builds_in_flight",
        "Number of background builds currently running",
    )
    .expect("metric creation failed")
});

pub static BUILD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "subarea_build_duration_seconds",
            "Wall time of background builds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
    )
    .expect("metric creation failed")
});

pub static CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "subarea_cache_hits_total",
        "Requests answered from the success cache",
    )
    .expect("metric creation failed")
});

pub static FAILURE_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "subarea_failure_cache_hits_total",
        "Requests answered from the failure cache during cooldown",
    )
    .expect("metric creation failed")
});

pub static COALESCED_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "subarea_coalesced_requests_total",
        "Requests that found a build already in flight",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests can build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(BUILDS_STARTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BUILDS_SUCCEEDED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BUILDS_FAILED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BUILDS_IN_FLIGHT.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BUILD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FAILURE_CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COALESCED_REQUESTS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a failed build under `kind` (`client`, `transient` or `timeout`).
pub fn record_build_failure(kind: &str) {
    BUILDS_FAILED.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_failure_kinds_are_labelled() {
        register_metrics();
        record_build_failure("timeout");
        assert!(BUILDS_FAILED.with_label_values(&["timeout"]).get() >= 1);
    }
}
