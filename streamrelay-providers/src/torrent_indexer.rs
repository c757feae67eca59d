//! A generic JSON torrent-indexer adapter, per spec §4.6/§6.
//!
//! Targets indexers that expose a simple `GET {base_url}/search?q=...`
//! JSON API (the shape Jackett/Prowlarr-style aggregators normalize
//! third-party trackers into) rather than scraping per-tracker HTML —
//! HTML scraping is provider-specific and out of this crate's scope
//! (§1 Out of scope: "per-provider scraping/parsing").

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use streamrelay_core::config::ProviderConfig;
use streamrelay_core::models::{ContentRef, Torrent};
use streamrelay_core::provider::{dedup_torrents_by_hash, ProviderContext, ProviderError, SearchResult};
use streamrelay_core::provider::traits::ProviderAdapter;

#[derive(Debug, Deserialize)]
struct IndexerResponse {
    #[serde(default)]
    results: Vec<IndexerHit>,
}

#[derive(Debug, Deserialize)]
struct IndexerHit {
    title: String,
    #[serde(rename = "infoHash")]
    info_hash: String,
    size: u64,
    seeders: u32,
    #[serde(default)]
    tracker: Option<String>,
    #[serde(default)]
    languages: Vec<String>,
    season: Option<u32>,
    episode: Option<u32>,
    resolution: Option<String>,
    codec: Option<String>,
}

/// Queries a JSON torrent indexer and deduplicates its own results by
/// `infoHash` before handing them back to the caller.
pub struct TorrentIndexerProvider {
    name: String,
    http: reqwest::Client,
}

impl TorrentIndexerProvider {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            http: reqwest::Client::new(),
        }
    }

    fn search_url(&self, user_cfg: &ProviderConfig, content_ref: &ContentRef) -> Result<String, ProviderError> {
        let base_url = user_cfg
            .base_url
            .as_deref()
            .ok_or_else(|| ProviderError::MissingField("base_url".to_string()))?;
        let query = content_ref
            .meta()
            .canonical_title
            .clone()
            .unwrap_or_else(|| content_ref.imdb_id().to_string());
        let query = url::form_urlencoded::byte_serialize(query.as_bytes()).collect::<String>();
        Ok(format!("{}/search?q={}&imdb={}", base_url.trim_end_matches('/'), query, content_ref.imdb_id()))
    }
}

#[async_trait]
impl ProviderAdapter for TorrentIndexerProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        content_ref: &ContentRef,
        user_cfg: &ProviderConfig,
        ctx: &ProviderContext,
    ) -> Result<SearchResult, ProviderError> {
        let url = self.search_url(user_cfg, content_ref)?;
        let timeout = ctx.remaining().max(Duration::from_millis(1));

        let mut request = self.http.get(&url).timeout(timeout);
        if let Some(api_key) = &user_cfg.api_key {
            request = request.header("X-Api-Key", api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthRequired);
        }
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if !response.status().is_success() {
            return Err(ProviderError::Network(format!("indexer returned {}", response.status())));
        }

        let parsed: IndexerResponse = response.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;

        let torrents = parsed
            .results
            .into_iter()
            .map(|hit| Torrent {
                info_hash: Torrent::normalized_hash(&hit.info_hash),
                title: hit.title,
                size_bytes: hit.size,
                seeders: hit.seeders,
                tracker: hit.tracker.unwrap_or_else(|| self.name.clone()),
                languages: hit.languages,
                season: hit.season,
                episode: hit.episode,
                resolution: hit.resolution,
                codec: hit.codec,
                quality_category: None,
            })
            .collect();

        Ok(SearchResult::torrents(dedup_torrents_by_hash(torrents)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn content_ref() -> ContentRef {
        ContentRef::Movie {
            imdb_id: "tt1234567".to_string(),
            meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn search_dedups_and_maps_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"title": "Movie.2024.1080p", "infoHash": "AAAA", "size": 1000, "seeders": 5, "tracker": "t1"},
                    {"title": "Movie.2024.1080p.dup", "infoHash": "aaaa", "size": 1000, "seeders": 50, "tracker": "t1"},
                ]
            })))
            .mount(&server)
            .await;

        let provider = TorrentIndexerProvider::new("indexer1");
        let mut user_cfg = ProviderConfig::default();
        user_cfg.base_url = Some(server.uri());
        let ctx = ProviderContext::new(Duration::from_secs(5));

        let result = provider.search(&content_ref(), &user_cfg, &ctx).await.unwrap();
        assert_eq!(result.torrents.len(), 1);
        assert_eq!(result.torrents[0].seeders, 50);
    }

    #[tokio::test]
    async fn missing_base_url_is_invalid_config() {
        let provider = TorrentIndexerProvider::new("indexer1");
        let user_cfg = ProviderConfig::default();
        let ctx = ProviderContext::new(Duration::from_secs(5));
        let err = provider.search(&content_ref(), &user_cfg, &ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingField(_)));
    }

    #[tokio::test]
    async fn rate_limited_response_maps_to_rate_limited_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let provider = TorrentIndexerProvider::new("indexer1");
        let mut user_cfg = ProviderConfig::default();
        user_cfg.base_url = Some(server.uri());
        let ctx = ProviderContext::new(Duration::from_secs(5));

        let err = provider.search(&content_ref(), &user_cfg, &ctx).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 30 }));
    }
}
