//! `GET /streams/{content_type}/{id}` — spec §6's `streams()` inbound call.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use streamrelay_core::models::{ContentMeta, ContentRef, Stream};
use streamrelay_engine::SelectedProvider;

use crate::http::error::AppError;
use crate::http::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamsQuery {
    /// Comma-separated provider instance names to fan out to. Defaults to
    /// every enabled provider in config when omitted.
    pub providers: Option<String>,
    /// Comma-separated language codes, used for cache-key scoping only.
    pub languages: Option<String>,
}

fn parse_content_ref(content_type: &str, id: &str) -> Result<ContentRef, AppError> {
    match content_type {
        "movie" => Ok(ContentRef::Movie {
            imdb_id: id.to_string(),
            meta: ContentMeta::default(),
        }),
        "series" => {
            let mut parts = id.splitn(3, ':');
            let imdb_id = parts.next().ok_or_else(|| AppError::bad_request("missing imdb id"))?;
            let season: u32 = parts
                .next()
                .ok_or_else(|| AppError::bad_request("series id must be imdbId:season:episode"))?
                .parse()
                .map_err(|_| AppError::bad_request("season must be a number"))?;
            let episode: u32 = parts
                .next()
                .ok_or_else(|| AppError::bad_request("series id must be imdbId:season:episode"))?
                .parse()
                .map_err(|_| AppError::bad_request("episode must be a number"))?;
            Ok(ContentRef::Episode {
                imdb_id: imdb_id.to_string(),
                season,
                episode,
                meta: ContentMeta::default(),
            })
        }
        other => Err(AppError::bad_request(format!("unknown content type: {other}"))),
    }
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn user_identity_hash(selected: &[SelectedProvider]) -> String {
    let mut tails: Vec<&str> = selected
        .iter()
        .filter_map(|p| p.user_cfg.api_key.as_deref())
        .map(|key| if key.len() > 4 { &key[key.len() - 4..] } else { key })
        .collect();
    if tails.is_empty() {
        return "anonymous".to_string();
    }
    tails.sort_unstable();
    let mut hasher = DefaultHasher::new();
    tails.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub async fn get_streams(
    State(state): State<AppState>,
    Path((content_type, id)): Path<(String, String)>,
    Query(query): Query<StreamsQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Stream>>, AppError> {
    let content_ref = parse_content_ref(&content_type, &id)?;

    let requested: Vec<String> = match &query.providers {
        Some(csv) => csv.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
        None => state.config.providers.iter().filter(|(_, cfg)| cfg.enabled).map(|(name, _)| name.clone()).collect(),
    };

    let default_timeout = Duration::from_millis(state.config.aggregator.default_provider_timeout_ms);
    let selected: Vec<SelectedProvider> = requested
        .into_iter()
        .filter_map(|name| {
            let cfg = state.config.providers.get(&name)?.clone();
            if !cfg.enabled {
                return None;
            }
            Some(SelectedProvider {
                timeout: cfg.timeout_ms.map(Duration::from_millis).unwrap_or(default_timeout),
                early_return_blocking: cfg.early_return_blocking,
                name,
                user_cfg: cfg,
            })
        })
        .collect();

    if selected.is_empty() {
        return Err(AppError::bad_request("no enabled provider matched the request"));
    }

    let languages: Vec<String> = query
        .languages
        .as_deref()
        .map(|csv| csv.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let ip = client_ip(&headers);
    let identity = user_identity_hash(&selected);

    let streams = state.aggregator.aggregate(&content_ref, &selected, &languages, &ip, &identity).await;
    Ok(Json(streams))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamrelay_core::models::ContentRef;

    #[test]
    fn parses_movie_ids() {
        let content_ref = parse_content_ref("movie", "tt0111161").unwrap();
        assert!(matches!(content_ref, ContentRef::Movie { imdb_id, .. } if imdb_id == "tt0111161"));
    }

    #[test]
    fn parses_series_ids() {
        let content_ref = parse_content_ref("series", "tt0903747:1:2").unwrap();
        match content_ref {
            ContentRef::Episode { imdb_id, season, episode, .. } => {
                assert_eq!(imdb_id, "tt0903747");
                assert_eq!(season, 1);
                assert_eq!(episode, 2);
            }
            ContentRef::Movie { .. } => panic!("expected an episode"),
        }
    }

    #[test]
    fn rejects_malformed_series_ids_and_unknown_content_types() {
        assert!(parse_content_ref("series", "tt0903747:1").is_err());
        assert!(parse_content_ref("series", "tt0903747:a:2").is_err());
        assert!(parse_content_ref("documentary", "tt1").is_err());
    }

    #[test]
    fn client_ip_reads_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers), "203.0.113.7");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn user_identity_hash_is_stable_and_order_independent() {
        let a = SelectedProvider {
            name: "real_debrid".to_string(),
            user_cfg: streamrelay_core::config::ProviderConfig {
                api_key: Some("abcd1234".to_string()),
                ..Default::default()
            },
            early_return_blocking: false,
            timeout: Duration::from_secs(1),
        };
        let b = SelectedProvider {
            name: "torrent_indexer".to_string(),
            user_cfg: streamrelay_core::config::ProviderConfig {
                api_key: Some("wxyz5678".to_string()),
                ..Default::default()
            },
            early_return_blocking: false,
            timeout: Duration::from_secs(1),
        };

        assert_eq!(user_identity_hash(&[a.clone(), b.clone()]), user_identity_hash(&[b, a]));
        assert_eq!(user_identity_hash(&[]), "anonymous");
    }
}
