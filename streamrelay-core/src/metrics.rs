//! Prometheus metrics collection for production monitoring.
//!
//! All metrics are exposed via the `/metrics` endpoint for Prometheus
//! scraping.

use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry,
    TextEncoder, register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_gauge_with_registry,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// HTTP metrics
pub mod http {
    use super::{HistogramVec, IntCounterVec, IntGauge, REGISTRY};
    use prometheus::{
        HistogramOpts, Opts, register_int_counter_vec_with_registry,
        register_int_gauge_with_registry,
    };

    /// Total HTTP requests, labeled by method, path, and status code.
    pub static HTTP_REQUESTS_TOTAL: std::sync::LazyLock<IntCounterVec> =
        std::sync::LazyLock::new(|| {
            register_int_counter_vec_with_registry!(
                Opts::new("http_requests_total", "Total number of HTTP requests"),
                &["method", "path", "status"],
                REGISTRY.clone()
            )
            .expect("failed to register HTTP_REQUESTS_TOTAL")
        });

    /// HTTP request duration in seconds, labeled by method and path.
    pub static HTTP_REQUEST_DURATION_SECONDS: std::sync::LazyLock<HistogramVec> =
        std::sync::LazyLock::new(|| {
            HistogramVec::new(
                HistogramOpts::new(
                    "http_request_duration_seconds",
                    "HTTP request duration in seconds",
                )
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
                &["method", "path"],
            )
            .and_then(|m| {
                REGISTRY.register(Box::new(m.clone()))?;
                Ok(m)
            })
            .expect("failed to register HTTP_REQUEST_DURATION_SECONDS")
        });

    /// Number of in-flight HTTP requests.
    pub static HTTP_REQUESTS_IN_FLIGHT: std::sync::LazyLock<IntGauge> =
        std::sync::LazyLock::new(|| {
            register_int_gauge_with_registry!(
                "http_requests_in_flight",
                "Number of HTTP requests currently being processed",
                REGISTRY.clone()
            )
            .expect("failed to register HTTP_REQUESTS_IN_FLIGHT")
        });
}

/// Provider/aggregation metrics.
pub mod provider {
    use super::{CounterVec, HistogramVec, IntGaugeVec, REGISTRY};
    use prometheus::{HistogramOpts, Opts, register_int_gauge_vec_with_registry};

    /// Per-provider search latency.
    pub static SEARCH_DURATION_SECONDS: std::sync::LazyLock<HistogramVec> =
        std::sync::LazyLock::new(|| {
            HistogramVec::new(
                HistogramOpts::new(
                    "provider_search_duration_seconds",
                    "Provider search duration in seconds",
                )
                .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 45.0]),
                &["provider"],
            )
            .and_then(|m| {
                REGISTRY.register(Box::new(m.clone()))?;
                Ok(m)
            })
            .expect("failed to register SEARCH_DURATION_SECONDS")
        });

    /// Per-provider search outcomes (ok / timeout / error / rate_limited / challenged).
    pub static SEARCH_OUTCOMES_TOTAL: std::sync::LazyLock<CounterVec> =
        std::sync::LazyLock::new(|| {
            super::register_counter_vec_with_registry!(
                "provider_search_outcomes_total",
                "Provider search outcomes",
                &["provider", "outcome"],
                REGISTRY.clone()
            )
            .expect("failed to register SEARCH_OUTCOMES_TOTAL")
        });

    /// Circuit breaker state per component (0=closed, 1=half-open, 2=open).
    pub static CIRCUIT_BREAKER_STATE: std::sync::LazyLock<IntGaugeVec> =
        std::sync::LazyLock::new(|| {
            register_int_gauge_vec_with_registry!(
                Opts::new("circuit_breaker_state", "Circuit breaker state per component"),
                &["component"],
                REGISTRY.clone()
            )
            .expect("failed to register CIRCUIT_BREAKER_STATE")
        });
}

/// Cache-layer metrics.
pub mod cache {
    use super::{CounterVec, IntGauge, REGISTRY, register_counter_vec_with_registry};

    pub static CACHE_HITS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_hits_total",
            "Total number of cache hits",
            &["cache_type", "level"],
            REGISTRY.clone()
        )
        .expect("failed to register CACHE_HITS")
    });

    pub static CACHE_MISSES: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_misses_total",
            "Total number of cache misses",
            &["cache_type", "level"],
            REGISTRY.clone()
        )
        .expect("failed to register CACHE_MISSES")
    });

    pub static DEDUP_IN_FLIGHT: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        super::register_int_gauge_with_registry!(
            "dedup_in_flight",
            "Number of requests currently collapsed behind an in-flight dedup future",
            REGISTRY.clone()
        )
        .expect("failed to register DEDUP_IN_FLIGHT")
    });

    pub static EARLY_RETURN_GATE_FIRED_TOTAL: std::sync::LazyLock<prometheus::IntCounter> =
        std::sync::LazyLock::new(|| {
            prometheus::register_int_counter_with_registry!(
                "early_return_gate_fired_total",
                "Total number of times the aggregator's early-return gate released a caller before all providers finished",
                REGISTRY.clone()
            )
            .expect("failed to register EARLY_RETURN_GATE_FIRED_TOTAL")
        });
}

/// Normalize a request path for metric labels.
///
/// Replaces path parameters (ids) with a placeholder to avoid
/// high-cardinality labels.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut result = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            result.push(*segment);
            continue;
        }
        let prev = if i > 0 { segments.get(i - 1) } else { None };
        let is_id = matches!(prev, Some(&"streams" | &"resolve"));
        if is_id {
            result.push(":id");
        } else {
            result.push(segment);
        }
    }

    result.join("/")
}

/// Expose metrics in Prometheus text format.
#[must_use]
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {}
        Err(e) => {
            tracing::error!("failed to encode metrics: {e}");
            return String::from("# failed to encode metrics\n");
        }
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("metrics buffer contains invalid utf-8: {e}");
        String::from("# invalid utf-8 in metrics\n")
    })
}
