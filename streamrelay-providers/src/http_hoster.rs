//! An HTTP file-hoster adapter, per spec §4.6/§4.11's "HTTP-hoster flow":
//! hand off to a provider-specific extractor that may itself call
//! `ChallengeSolver` and `ProxyRotator`.
//!
//! `search` queries a configured JSON endpoint for candidate streams;
//! `resolve` validates (and if necessary bypasses) access to the chosen
//! stream's URL before handing it back as the final playable link — a
//! direct fetch first, then a solved challenge cookie, then SOCKS5
//! rotation as a last resort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use streamrelay_core::config::ProviderConfig;
use streamrelay_core::models::{ContentRef, HttpStream};
use streamrelay_core::provider::traits::ProviderAdapter;
use streamrelay_core::provider::{ProviderContext, ProviderError, SearchResult};
use streamrelay_proxy::{is_challenge, ChallengeSolver, ProxyRotator};

#[derive(Debug, Deserialize)]
struct HosterResponse {
    #[serde(default)]
    results: Vec<HosterHit>,
}

#[derive(Debug, Deserialize)]
struct HosterHit {
    title: String,
    url: String,
    size: Option<u64>,
    resolution: Option<String>,
}

enum FetchOutcome {
    Ok,
    Blocked,
}

/// Queries a hoster's JSON search endpoint and validates/bypasses access
/// to the resulting URLs on resolve.
pub struct HttpHosterProvider {
    name: String,
    http: reqwest::Client,
    proxy_rotator: Arc<ProxyRotator>,
    challenge_solver: Arc<ChallengeSolver>,
}

impl HttpHosterProvider {
    #[must_use]
    pub fn new(name: impl Into<String>, proxy_rotator: Arc<ProxyRotator>, challenge_solver: Arc<ChallengeSolver>) -> Self {
        Self {
            name: name.into(),
            http: reqwest::Client::new(),
            proxy_rotator,
            challenge_solver,
        }
    }

    fn domain_of(url: &str) -> Result<String, ProviderError> {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| ProviderError::Parse(format!("not a valid url: {url}")))
    }

    async fn try_direct(&self, url: &str, cookie: Option<&str>, user_agent: Option<&str>) -> Result<FetchOutcome, ProviderError> {
        let mut request = self.http.get(url);
        if let Some(cookie) = cookie {
            request = request.header("Cookie", cookie);
        }
        if let Some(user_agent) = user_agent {
            request = request.header("User-Agent", user_agent);
        }
        let response = request.send().await.map_err(|e| ProviderError::Network(e.to_string()))?;
        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Ok(FetchOutcome::Blocked);
        }
        let body = response.text().await.map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(if is_challenge(&body) { FetchOutcome::Blocked } else { FetchOutcome::Ok })
    }
}

#[async_trait]
impl ProviderAdapter for HttpHosterProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        content_ref: &ContentRef,
        user_cfg: &ProviderConfig,
        ctx: &ProviderContext,
    ) -> Result<SearchResult, ProviderError> {
        let base_url = user_cfg.base_url.as_deref().ok_or_else(|| ProviderError::MissingField("base_url".to_string()))?;
        let query = content_ref.meta().canonical_title.clone().unwrap_or_else(|| content_ref.imdb_id().to_string());
        let query = url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>();
        let url = format!("{}/search?q={}", base_url.trim_end_matches('/'), query);
        let timeout = ctx.remaining().max(Duration::from_millis(1));

        let response = self.http.get(&url).timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;
        if !response.status().is_success() {
            return Err(ProviderError::Network(format!("hoster search returned {}", response.status())));
        }
        let parsed: HosterResponse = response.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;

        let streams = parsed
            .results
            .into_iter()
            .map(|hit| HttpStream {
                provider_label: self.name.clone(),
                display_title: hit.title,
                size_bytes: hit.size,
                resolution: hit.resolution,
                opaque_url: hit.url,
            })
            .collect();
        Ok(SearchResult::http_streams(streams))
    }

    async fn resolve(&self, opaque_ref: &str, _user_cfg: &ProviderConfig, _ctx: &ProviderContext) -> Result<Option<String>, ProviderError> {
        let domain = Self::domain_of(opaque_ref)?;

        if matches!(self.try_direct(opaque_ref, None, None).await?, FetchOutcome::Ok) {
            return Ok(Some(opaque_ref.to_string()));
        }

        let solved = self.challenge_solver.solve(&domain, opaque_ref).await.map_err(|_| ProviderError::Challenged)?;
        if !solved.cookie_header.is_empty() && matches!(self.try_direct(opaque_ref, Some(&solved.cookie_header), Some(&solved.user_agent)).await?, FetchOutcome::Ok) {
            return Ok(Some(opaque_ref.to_string()));
        }

        let headers = vec![("Cookie".to_string(), solved.cookie_header), ("User-Agent".to_string(), solved.user_agent)];
        match self.proxy_rotator.request_with_rotation(opaque_ref, &headers).await {
            Ok(_) => Ok(Some(opaque_ref.to_string())),
            Err(_) => Err(ProviderError::Challenged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamrelay_core::cache::{ByteStore, ByteStoreConfig, KeyBuilder};
    use streamrelay_core::config::{ChallengeConfig, ProxyConfig};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_collaborators() -> (Arc<ProxyRotator>, Arc<ChallengeSolver>) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::query(include_str!("../../migrations/20260101000000_byte_store.sql")).execute(&pool).await.unwrap();
        let byte_store = ByteStore::new(
            pool,
            &ByteStoreConfig {
                upsert_concurrency: 2,
                upsert_queue_max: 50,
                max_consecutive_failures: 5,
                circuit_min_backoff: Duration::from_secs(1),
                circuit_max_backoff: Duration::from_secs(5),
            },
        );
        let proxy_rotator = Arc::new(ProxyRotator::new(ProxyConfig::default()));
        let challenge_solver = Arc::new(ChallengeSolver::new(byte_store, KeyBuilder::new("v1"), ChallengeConfig::default()));
        (proxy_rotator, challenge_solver)
    }

    #[tokio::test]
    async fn search_maps_hoster_results_to_http_streams() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"title": "Movie 1080p", "url": "https://hoster.example/x", "size": 2_000_000_000u64, "resolution": "1080p"}]
            })))
            .mount(&server)
            .await;

        let (proxy_rotator, challenge_solver) = test_collaborators().await;
        let provider = HttpHosterProvider::new("hoster1", proxy_rotator, challenge_solver);
        let mut user_cfg = ProviderConfig::default();
        user_cfg.base_url = Some(server.uri());
        let ctx = ProviderContext::new(Duration::from_secs(5));
        let content_ref = ContentRef::Movie { imdb_id: "tt1".to_string(), meta: Default::default() };

        let result = provider.search(&content_ref, &user_cfg, &ctx).await.unwrap();
        assert_eq!(result.http_streams.len(), 1);
        assert_eq!(result.http_streams[0].opaque_url, "https://hoster.example/x");
    }

    #[tokio::test]
    async fn resolve_returns_url_unchanged_when_directly_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/file")).respond_with(ResponseTemplate::new(200).set_body_string("ok")).mount(&server).await;

        let (proxy_rotator, challenge_solver) = test_collaborators().await;
        let provider = HttpHosterProvider::new("hoster1", proxy_rotator, challenge_solver);
        let user_cfg = ProviderConfig::default();
        let ctx = ProviderContext::new(Duration::from_secs(5));

        let url = format!("{}/file", server.uri());
        let resolved = provider.resolve(&url, &user_cfg, &ctx).await.unwrap();
        assert_eq!(resolved.as_deref(), Some(url.as_str()));
    }
}
