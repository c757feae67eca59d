//! A RealDebrid-class magnet→debrid resolve adapter, per spec §4.11's
//! "magnet → debrid flow" state machine (§4.13 `IDLE → ADDING → SELECTING
//! → POLLING_DOWNLOAD → POLLING_LINKS → UNRESTRICTING → DONE | FAILED`).
//!
//! `search`/`probe_cached` are thin JSON lookups against the backend's
//! cache-check and instant-availability endpoints; `resolve` drives the
//! full eight-step state machine. The `ProviderAdapter::resolve` contract
//! takes a single opaque string, so an episode hint (when present) is
//! carried as a `::episode::S01E02` suffix appended to the magnet URI —
//! safe because `Torrent::magnet_uri` percent-encodes the display name,
//! so the literal separator can never appear in a generated magnet.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use streamrelay_core::config::ProviderConfig;
use streamrelay_core::models::{ContentRef, Torrent};
use streamrelay_core::provider::traits::ProviderAdapter;
use streamrelay_core::provider::{ProviderContext, ProviderError, SearchResult};

const EPISODE_HINT_SEP: &str = "::episode::";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_DOWNLOAD_POLLS: u32 = 15;
const MAX_LINK_POLLS: u32 = 5;
const DEFAULT_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

#[must_use]
pub fn encode_episode_hint(magnet_uri: &str, season: u32, episode: u32) -> String {
    format!("{magnet_uri}{EPISODE_HINT_SEP}S{season:02}E{episode:02}")
}

fn split_hint(opaque_ref: &str) -> (&str, Option<(u32, u32)>) {
    let Some((magnet, hint)) = opaque_ref.split_once(EPISODE_HINT_SEP) else {
        return (opaque_ref, None);
    };
    let parsed = Regex::new(r"^S(\d+)E(\d+)$")
        .ok()
        .and_then(|re| re.captures(hint))
        .and_then(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)));
    (magnet, parsed)
}

#[derive(Debug, Deserialize)]
struct AddMagnetResponse {
    id: String,
}

#[derive(Debug, Deserialize, Clone)]
struct TorrentFile {
    id: u64,
    path: String,
    #[allow(dead_code)]
    bytes: u64,
    selected: u32,
}

#[derive(Debug, Deserialize, Default)]
struct TorrentInfo {
    status: String,
    #[serde(default)]
    files: Vec<TorrentFile>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
}

#[derive(Debug, Deserialize)]
struct InstantAvailability(std::collections::HashMap<String, serde_json::Value>);

/// Drives RealDebrid's `addMagnet`/`selectFiles`/`info`/`unrestrict` REST
/// surface (§6's "Outbound protocols").
pub struct RealDebridProvider {
    name: String,
    http: reqwest::Client,
}

impl RealDebridProvider {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            http: reqwest::Client::new(),
        }
    }

    fn base_url(user_cfg: &ProviderConfig) -> String {
        user_cfg.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn api_key(user_cfg: &ProviderConfig) -> Result<&str, ProviderError> {
        user_cfg.api_key.as_deref().ok_or(ProviderError::AuthRequired)
    }

    fn map_status(status: reqwest::StatusCode) -> ProviderError {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => ProviderError::AuthRequired,
            reqwest::StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after_secs: 60 },
            other => ProviderError::Network(format!("real-debrid returned {other}")),
        }
    }

    async fn add_magnet(&self, base_url: &str, api_key: &str, magnet_uri: &str) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{base_url}/torrents/addMagnet"))
            .bearer_auth(api_key)
            .form(&[("magnet", magnet_uri)])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status()));
        }
        let parsed: AddMagnetResponse = response.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.id)
    }

    async fn select_files(&self, base_url: &str, api_key: &str, torrent_id: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(format!("{base_url}/torrents/selectFiles/{torrent_id}"))
            .bearer_auth(api_key)
            .form(&[("files", "all")])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status()));
        }
        Ok(())
    }

    async fn fetch_info(&self, base_url: &str, api_key: &str, torrent_id: &str) -> Result<TorrentInfo, ProviderError> {
        let response = self
            .http
            .get(format!("{base_url}/torrents/info/{torrent_id}"))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status()));
        }
        response.json().await.map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn poll_until_downloaded(&self, base_url: &str, api_key: &str, torrent_id: &str) -> Result<TorrentInfo, ProviderError> {
        for attempt in 0..MAX_DOWNLOAD_POLLS {
            let info = self.fetch_info(base_url, api_key, torrent_id).await?;
            match info.status.as_str() {
                "downloaded" | "finished" => return Ok(info),
                "magnet_error" | "error" | "virus" | "dead" => {
                    return Err(ProviderError::Parse(format!("torrent entered terminal failure state: {}", info.status)));
                }
                "downloading" | "queued" | "magnet_conversion" | "compressing" | "uploading" => {
                    if attempt + 1 == MAX_DOWNLOAD_POLLS {
                        return Err(ProviderError::Parse("still downloading".to_string()));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                other => return Err(ProviderError::Parse(format!("unrecognized torrent status: {other}"))),
            }
        }
        Err(ProviderError::Parse("still downloading".to_string()))
    }

    async fn poll_until_links(&self, base_url: &str, api_key: &str, torrent_id: &str, mut info: TorrentInfo) -> Result<TorrentInfo, ProviderError> {
        for attempt in 0..MAX_LINK_POLLS {
            if !info.links.is_empty() {
                return Ok(info);
            }
            if attempt + 1 == MAX_LINK_POLLS {
                return Err(ProviderError::Parse("backend never populated links".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            info = self.fetch_info(base_url, api_key, torrent_id).await?;
        }
        Ok(info)
    }

    async fn delete_torrent_best_effort(&self, base_url: &str, api_key: &str, torrent_id: &str) {
        let _ = self
            .http
            .delete(format!("{base_url}/torrents/delete/{torrent_id}"))
            .bearer_auth(api_key)
            .send()
            .await;
    }

    async fn unrestrict(&self, base_url: &str, api_key: &str, link: &str) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{base_url}/unrestrict/link"))
            .bearer_auth(api_key)
            .form(&[("link", link)])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status()));
        }
        let parsed: UnrestrictResponse = response.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.download)
    }
}

/// §4.11 step 5-6: pick the file to hand back, preferring an
/// episode-hint match over "largest selected video".
fn choose_file(files: &[TorrentFile], episode_hint: Option<(u32, u32)>) -> Option<usize> {
    let selected: Vec<(usize, &TorrentFile)> = files.iter().enumerate().filter(|(_, f)| f.selected == 1).collect();
    if selected.is_empty() {
        return None;
    }
    if let Some((season, episode)) = episode_hint {
        let pattern = format!(r"(?i)(s0*{season}e0*{episode}\b|{season}x0*{episode}\b|episode[\s_.-]*0*{episode}\b|e0*{episode}[\s_.])");
        if let Ok(re) = Regex::new(&pattern) {
            if let Some((idx, _)) = selected.iter().find(|(_, f)| re.is_match(&f.path)) {
                return Some(*idx);
            }
        }
    }
    selected.iter().max_by_key(|(_, f)| f.bytes).map(|(idx, _)| *idx)
}

/// §4.11 step 5: `links[i] ↔ allFiles[i]` is the canonical mapping;
/// falls back to the file's own `link` field, then to its position
/// among selected-only files.
fn map_file_to_link(files: &[TorrentFile], links: &[String], chosen_idx: usize) -> Option<String> {
    if let Some(link) = links.get(chosen_idx) {
        return Some(link.clone());
    }
    let selected_position = files.iter().take(chosen_idx).filter(|f| f.selected == 1).count();
    links.get(selected_position).cloned()
}

#[async_trait]
impl ProviderAdapter for RealDebridProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        _content_ref: &ContentRef,
        _user_cfg: &ProviderConfig,
        _ctx: &ProviderContext,
    ) -> Result<SearchResult, ProviderError> {
        // A debrid backend has nothing of its own to search for — it only
        // resolves torrents surfaced by indexer providers (§4.6).
        Ok(SearchResult::default())
    }

    async fn probe_cached(
        &self,
        hashes: &[String],
        user_cfg: &ProviderConfig,
        ctx: &ProviderContext,
    ) -> Result<HashSet<String>, ProviderError> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let base_url = Self::base_url(user_cfg);
        let api_key = Self::api_key(user_cfg)?;
        let joined = hashes.join("/");
        let timeout = ctx.remaining().max(Duration::from_millis(1));

        let response = self
            .http
            .get(format!("{base_url}/torrents/instantAvailability/{joined}"))
            .bearer_auth(api_key)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status()));
        }
        let parsed: InstantAvailability = response.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.0.into_iter().filter(|(_, v)| !matches!(v, serde_json::Value::Array(a) if a.is_empty())).map(|(k, _)| Torrent::normalized_hash(&k)).collect())
    }

    async fn resolve(&self, opaque_ref: &str, user_cfg: &ProviderConfig, _ctx: &ProviderContext) -> Result<Option<String>, ProviderError> {
        let (magnet_uri, episode_hint) = split_hint(opaque_ref);
        let base_url = Self::base_url(user_cfg);
        let api_key = Self::api_key(user_cfg)?;

        let torrent_id = self.add_magnet(&base_url, api_key, magnet_uri).await?;
        let result = self.resolve_added_torrent(&base_url, api_key, &torrent_id, episode_hint).await;
        if result.is_err() {
            self.delete_torrent_best_effort(&base_url, api_key, &torrent_id).await;
        }
        result
    }
}

impl RealDebridProvider {
    async fn resolve_added_torrent(
        &self,
        base_url: &str,
        api_key: &str,
        torrent_id: &str,
        episode_hint: Option<(u32, u32)>,
    ) -> Result<Option<String>, ProviderError> {
        self.select_files(base_url, api_key, torrent_id).await?;
        let info = self.poll_until_downloaded(base_url, api_key, torrent_id).await?;
        let info = self.poll_until_links(base_url, api_key, torrent_id, info).await?;

        let Some(chosen_idx) = choose_file(&info.files, episode_hint) else {
            return Ok(None);
        };
        let Some(link) = map_file_to_link(&info.files, &info.links, chosen_idx) else {
            return Err(ProviderError::Parse("no link mapped to the chosen file".to_string()));
        };
        let url = self.unrestrict(base_url, api_key, &link).await?;
        Ok(Some(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: u64, path: &str, bytes: u64, selected: u32) -> TorrentFile {
        TorrentFile { id, path: path.to_string(), bytes, selected }
    }

    #[test]
    fn episode_hint_round_trips_through_opaque_ref() {
        let encoded = encode_episode_hint("magnet:?xt=urn:btih:abc", 1, 4);
        let (magnet, hint) = split_hint(&encoded);
        assert_eq!(magnet, "magnet:?xt=urn:btih:abc");
        assert_eq!(hint, Some((1, 4)));
    }

    #[test]
    fn opaque_ref_without_hint_has_no_episode() {
        let (magnet, hint) = split_hint("magnet:?xt=urn:btih:abc");
        assert_eq!(magnet, "magnet:?xt=urn:btih:abc");
        assert_eq!(hint, None);
    }

    #[test]
    fn choose_file_prefers_episode_hint_match_over_largest() {
        let files = vec![
            file(1, "Show.S01E01.mkv", 9_000_000_000, 1),
            file(2, "Show.S01E02.mkv", 500_000_000, 1),
        ];
        let chosen = choose_file(&files, Some((1, 2))).unwrap();
        assert_eq!(files[chosen].path, "Show.S01E02.mkv");
    }

    #[test]
    fn choose_file_falls_back_to_largest_selected_without_hint() {
        let files = vec![file(1, "sample.mkv", 10, 1), file(2, "movie.mkv", 9_000_000_000, 1), file(3, "unselected.mkv", 50_000_000_000, 0)];
        let chosen = choose_file(&files, None).unwrap();
        assert_eq!(files[chosen].path, "movie.mkv");
    }

    #[test]
    fn map_file_to_link_uses_positional_index_in_all_files() {
        let files = vec![file(1, "a.mkv", 1, 1), file(2, "b.mkv", 1, 1)];
        let links = vec!["https://rd/a".to_string(), "https://rd/b".to_string()];
        assert_eq!(map_file_to_link(&files, &links, 1).as_deref(), Some("https://rd/b"));
    }

    #[test]
    fn map_file_to_link_falls_back_to_selected_only_position() {
        let files = vec![file(1, "skip.mkv", 1, 0), file(2, "chosen.mkv", 1, 1)];
        // Only one link present — corresponds to the single selected file.
        let links = vec!["https://rd/only".to_string()];
        assert_eq!(map_file_to_link(&files, &links, 1).as_deref(), Some("https://rd/only"));
    }

    #[test]
    fn missing_api_key_is_auth_required() {
        let cfg = ProviderConfig::default();
        assert!(matches!(RealDebridProvider::api_key(&cfg), Err(ProviderError::AuthRequired)));
    }
}
