// Module: http
// Inbound HTTP surface: streams()/resolve() (spec §6) plus health/metrics.

pub mod error;
pub mod health;
pub mod resolve;
pub mod streams;

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use streamrelay_core::cache::ByteStore;
use streamrelay_core::provider::ProviderRegistry;
use streamrelay_core::Config;
use streamrelay_engine::{Aggregator, Resolver};

pub use error::{AppError, AppResult};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,
    pub aggregator: Arc<Aggregator>,
    pub resolver: Arc<Resolver>,
    pub byte_store: Arc<ByteStore>,
}

/// Builds the full router: `streams()`/`resolve()` plus health and metrics,
/// with CORS, a request timeout, and request tracing/metrics applied
/// globally.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    Router::new()
        .merge(health::create_health_router())
        .route("/streams/{content_type}/{id}", get(streams::get_streams))
        .route("/resolve", post(resolve::resolve))
        .layer(cors)
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
        .layer(TimeoutLayer::with_status_code(axum::http::StatusCode::REQUEST_TIMEOUT, std::time::Duration::from_secs(60)))
        .layer(axum_middleware::from_fn(crate::observability::metrics_middleware::metrics_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.development_mode {
        return CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    }
    if config.server.cors_allowed_origins.is_empty() {
        tracing::warn!("CORS: no allowed origins configured in production; cross-origin requests will be denied");
        return CorsLayer::new();
    }
    let origins: Vec<HeaderValue> = config.server.cors_allowed_origins.iter().filter_map(|origin| origin.parse().ok()).collect();
    CorsLayer::new().allow_origin(origins).allow_methods([Method::GET, Method::POST])
}
