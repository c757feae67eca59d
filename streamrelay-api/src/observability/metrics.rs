//! Prometheus metrics for the HTTP surface.

use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Total HTTP requests, labeled by method, path, and status code.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> =
    Lazy::new(|| IntCounterVec::new(Opts::new("http_requests_total", "Total number of HTTP requests"), &["method", "path", "status"]).expect("failed to create http_requests_total"));

/// HTTP request duration in seconds, labeled by method and path.
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds").buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["method", "path"],
    )
    .expect("failed to create http_request_duration_seconds")
});

/// Number of in-flight HTTP requests.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| IntGauge::new("http_requests_in_flight", "Number of HTTP requests currently being processed").expect("failed to create http_requests_in_flight"));

fn register_metrics(registry: &Registry) {
    registry.register(Box::new(HTTP_REQUESTS_TOTAL.clone())).expect("failed to register http_requests_total");
    registry.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone())).expect("failed to register http_request_duration_seconds");
    registry.register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone())).expect("failed to register http_requests_in_flight");
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).expect("failed to encode metrics");
    String::from_utf8(buffer).expect("metrics are valid UTF-8")
}

/// Normalize a request path for metric labels: collapse path params so
/// distinct content ids don't explode label cardinality.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut result = Vec::with_capacity(segments.len());
    let mut collapsing = false;

    for segment in &segments {
        if collapsing {
            result.push(":id");
            continue;
        }
        result.push(*segment);
        if *segment == "streams" {
            collapsing = true;
        }
    }

    result.join("/")
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn collapses_both_segments_after_streams() {
        assert_eq!(normalize_path("/streams/movie/tt1234567"), "/streams/:id/:id");
    }

    #[test]
    fn leaves_unrelated_paths_untouched() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }
}
