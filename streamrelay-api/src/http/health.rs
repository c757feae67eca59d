//! Health check and metrics endpoints.
//!
//! - `/health/live` - liveness probe: process is running.
//! - `/health/ready` - readiness probe: the ByteStore is reachable.
//! - `/health` - alias for `/health/live`.
//! - `/metrics` - Prometheus metrics.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::http::AppState;
use crate::observability::metrics;

pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .route("/metrics", get(prometheus_metrics))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok".to_string(), message: None }))
}

pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.byte_store.get("healthcheck", "ping").await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse { status: "healthy".to_string(), message: None })),
        Err(e) => {
            error!("ByteStore health check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    message: Some(format!("ByteStore unreachable: {e}")),
                }),
            )
        }
    }
}

pub async fn prometheus_metrics() -> impl IntoResponse {
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], metrics::gather_metrics())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn liveness_check_reports_ok() {
        let response = liveness_check().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.status, "ok");
    }

    #[tokio::test]
    async fn prometheus_metrics_exposes_http_request_counter() {
        let response = prometheus_metrics().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("http_requests_total"));
    }
}
