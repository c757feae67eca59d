//! `POST /resolve` — spec §6's `resolve()` inbound call.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use streamrelay_core::provider::ProviderContext;
use streamrelay_engine::resolver::ResolveHint;
use streamrelay_engine::ResolveOutcome;

use crate::http::error::AppError;
use crate::http::AppState;

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub provider: String,
    pub api_key: Option<String>,
    pub opaque_ref: String,
    /// The hash this opaque ref resolves, scoping the mem-cache resolve key
    /// and the durable-cache eviction on a stale-cache transition.
    pub content_hash: String,
    /// The search cache key this hash's row was written under.
    pub cache_key: String,
    /// Whether a prior `probe_cached` call claimed this hash was instantly
    /// available.
    #[serde(default)]
    pub claimed_cached: bool,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub url: Option<String>,
}

pub async fn resolve(State(state): State<AppState>, Json(body): Json<ResolveRequest>) -> Result<Json<ResolveResponse>, AppError> {
    let mut user_cfg = state.config.providers.get(&body.provider).cloned().unwrap_or_default();
    if body.api_key.is_some() {
        user_cfg.api_key = body.api_key;
    }

    let timeout = user_cfg.timeout_ms.map(Duration::from_millis).unwrap_or_else(|| Duration::from_millis(state.config.aggregator.default_provider_timeout_ms));
    let ctx = ProviderContext::new(timeout);
    let hint = ResolveHint { claimed_cached: body.claimed_cached };

    let outcome = state
        .resolver
        .resolve(&body.provider, &body.opaque_ref, &body.content_hash, &body.cache_key, &user_cfg, hint, &ctx)
        .await?;

    let url = match outcome {
        ResolveOutcome::Url(url) => Some(url),
        ResolveOutcome::NotCached => None,
    };
    Ok(Json(ResolveResponse { url }))
}
