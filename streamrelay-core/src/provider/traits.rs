//! The `ProviderAdapter` contract, per spec §4.6.
//!
//! One mandatory method (`search`), two optional ones defaulting to
//! no-ops — the same "small mandatory surface, opt-in extras" shape used
//! throughout this codebase for pluggable backends.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::config::ProviderConfig;
use crate::models::{ContentRef, HttpStream, PersonalFile, Torrent};
use crate::provider::{ProviderContext, ProviderError};

/// What a `search` call yields: either torrent results (indexers, debrid
/// services) or HTTP-hoster results, never both — plus any personal files
/// the provider's own storage surfaced for this user.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub torrents: Vec<Torrent>,
    pub http_streams: Vec<HttpStream>,
    pub personal_files: Vec<PersonalFile>,
}

impl SearchResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.torrents.is_empty() && self.http_streams.is_empty() && self.personal_files.is_empty()
    }

    #[must_use]
    pub fn torrents(torrents: Vec<Torrent>) -> Self {
        Self {
            torrents,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn http_streams(http_streams: Vec<HttpStream>) -> Self {
        Self {
            http_streams,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_personal_files(mut self, personal_files: Vec<PersonalFile>) -> Self {
        self.personal_files = personal_files;
        self
    }
}

/// One backend: a torrent-indexer scraper, a debrid service, an HTTP
/// hoster, or a Usenet indexer.
///
/// Implementors must never let an internal error escape as a panic — on
/// failure, return `Err(ProviderError)` and the caller logs the cause and
/// treats the provider as having yielded nothing for this round (§4.6).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider name used in cache keys, metrics labels, and the
    /// `provider` tag on every produced result.
    fn name(&self) -> &str;

    /// Looks up content. Must honor `ctx`'s cancellation/deadline and
    /// return whatever was collected so far rather than block past it.
    async fn search(
        &self,
        content_ref: &ContentRef,
        user_cfg: &ProviderConfig,
        ctx: &ProviderContext,
    ) -> Result<SearchResult, ProviderError>;

    /// Debrid-only: which of the given hashes are instantly available.
    /// Non-debrid providers keep the default empty response.
    async fn probe_cached(
        &self,
        _hashes: &[String],
        _user_cfg: &ProviderConfig,
        _ctx: &ProviderContext,
    ) -> Result<HashSet<String>, ProviderError> {
        Ok(HashSet::new())
    }

    /// Providers with an addressing indirection (e.g. a debrid service
    /// that hands back a short-lived direct link for a magnet) resolve an
    /// opaque reference to a final playable URL. Providers without one
    /// keep the default `None`.
    async fn resolve(
        &self,
        _opaque_ref: &str,
        _user_cfg: &ProviderConfig,
        _ctx: &ProviderContext,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}

/// Deduplicate a provider's own torrent results by `info_hash`, preferring
/// the entry with the higher seeder count — a mandatory adapter-side step
/// per §4.6.
#[must_use]
pub fn dedup_torrents_by_hash(torrents: Vec<Torrent>) -> Vec<Torrent> {
    use std::collections::HashMap;

    let mut by_hash: HashMap<String, Torrent> = HashMap::new();
    for torrent in torrents {
        let hash = Torrent::normalized_hash(&torrent.info_hash);
        match by_hash.get(&hash) {
            Some(existing) if existing.seeders >= torrent.seeders => {}
            _ => {
                by_hash.insert(hash, torrent);
            }
        }
    }
    by_hash.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(hash: &str, seeders: u32) -> Torrent {
        Torrent {
            info_hash: hash.to_string(),
            title: "t".to_string(),
            size_bytes: 1,
            seeders,
            tracker: "tracker".to_string(),
            languages: vec![],
            season: None,
            episode: None,
            resolution: None,
            codec: None,
            quality_category: None,
        }
    }

    #[test]
    fn dedup_keeps_higher_seeder_count_and_normalizes_case() {
        let results = dedup_torrents_by_hash(vec![torrent("ABCDEF", 5), torrent("abcdef", 50)]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seeders, 50);
    }

    #[test]
    fn dedup_leaves_distinct_hashes_untouched() {
        let results = dedup_torrents_by_hash(vec![torrent("aaaa", 5), torrent("bbbb", 1)]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_result_is_empty_checks_all_three_kinds() {
        assert!(SearchResult::default().is_empty());
        assert!(!SearchResult::torrents(vec![torrent("a", 1)]).is_empty());
    }
}
