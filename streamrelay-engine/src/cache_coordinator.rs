//! The read-through/write-back gate around a provider search, per spec §4.8.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use streamrelay_core::cache::{ByteStore, KeyBuilder};
use streamrelay_core::models::{now_unix_secs, CacheRecord, ContentRef, HttpStream, PersonalFile, Torrent};
use streamrelay_core::provider::SearchResult;

use crate::background_refresher::Refresher;

/// One item as persisted in [`ByteStore`]'s `data` column. Replaces the
/// source system's dynamic `T[] | {data, count}` blob shape with a single
/// discriminated record per row (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CachedItem {
    Torrent(Torrent),
    HttpStream(HttpStream),
}

impl CachedItem {
    fn hash_key(&self) -> String {
        match self {
            CachedItem::Torrent(t) => Torrent::normalized_hash(&t.info_hash),
            CachedItem::HttpStream(h) => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                h.dedup_key().hash(&mut hasher);
                format!("{:016x}", hasher.finish())
            }
        }
    }

    fn resolution(&self) -> Option<String> {
        match self {
            CachedItem::Torrent(t) => t.resolution.clone(),
            CachedItem::HttpStream(h) => h.resolution.clone(),
        }
    }

    fn size_bytes(&self) -> Option<u64> {
        match self {
            CachedItem::Torrent(t) => Some(t.size_bytes),
            CachedItem::HttpStream(h) => h.size_bytes,
        }
    }

    fn file_name(&self) -> Option<String> {
        match self {
            CachedItem::Torrent(t) => Some(t.title.clone()),
            CachedItem::HttpStream(h) => Some(h.display_title.clone()),
        }
    }
}

/// Providers whose `HttpStream::opaque_url` is already a directly playable
/// URL are allowed to have that URL persisted; everyone else's resolved
/// links are treated as too ephemeral to cache (§4.8 step 7).
#[derive(Debug, Clone, Default)]
pub struct UrlCachingWhitelist {
    providers: HashSet<String>,
}

impl UrlCachingWhitelist {
    #[must_use]
    pub fn new(providers: impl IntoIterator<Item = String>) -> Self {
        Self {
            providers: providers.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn allows(&self, provider: &str) -> bool {
        self.providers.contains(provider)
    }
}

pub struct CacheCoordinatorConfig {
    pub min_results_per_service: usize,
    pub search_ttl_secs: i64,
}

/// Owns the read-through/write-back logic; holds no provider-specific
/// knowledge beyond the cacheability whitelist.
pub struct CacheCoordinator {
    byte_store: Arc<ByteStore>,
    key_builder: Arc<KeyBuilder>,
    whitelist: UrlCachingWhitelist,
    config: CacheCoordinatorConfig,
}

impl CacheCoordinator {
    #[must_use]
    pub fn new(
        byte_store: Arc<ByteStore>,
        key_builder: Arc<KeyBuilder>,
        whitelist: UrlCachingWhitelist,
        config: CacheCoordinatorConfig,
    ) -> Self {
        Self {
            byte_store,
            key_builder,
            whitelist,
            config,
        }
    }

    fn cache_key(&self, provider: &str, content_ref: &ContentRef, languages: &[String]) -> String {
        self.key_builder
            .search_key(provider, content_ref.content_type(), &content_ref.id(), languages)
    }

    fn release_key(&self, content_ref: &ContentRef) -> String {
        let (season, episode) = content_ref.season_episode().unzip();
        self.key_builder
            .release_key(content_ref.content_type(), content_ref.imdb_id(), season, episode)
    }

    /// Reads every non-expired row for this provider/content/language
    /// combination.
    async fn read_cached(&self, cache_key: &str) -> Vec<CachedItem> {
        match self.byte_store.get_by_service(cache_key).await {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| serde_json::from_value::<CachedItem>(row.data).ok())
                .collect(),
            Err(err) => {
                warn!(cache_key, error = %err, "cache read failed, treating as miss");
                Vec::new()
            }
        }
    }

    fn to_search_result(items: Vec<CachedItem>) -> SearchResult {
        let mut result = SearchResult::default();
        for item in items {
            match item {
                CachedItem::Torrent(t) => result.torrents.push(t),
                CachedItem::HttpStream(h) => result.http_streams.push(h),
            }
        }
        result
    }

    /// Strips what write-back must never persist: personal items, and
    /// already-resolved URLs for providers outside the whitelist. Never
    /// returns a non-empty input as an empty output unless every item was
    /// actually filtered.
    fn cacheable_items(&self, provider: &str, result: &SearchResult) -> Vec<CachedItem> {
        let mut by_hash: HashMap<String, CachedItem> = HashMap::new();

        for torrent in &result.torrents {
            let item = CachedItem::Torrent(torrent.clone());
            by_hash.insert(item.hash_key(), item);
        }

        if self.whitelist.allows(provider) {
            for stream in &result.http_streams {
                let item = CachedItem::HttpStream(stream.clone());
                by_hash.insert(item.hash_key(), item);
            }
        }

        by_hash.into_values().collect()
    }

    fn to_cache_records(
        &self,
        provider: &str,
        content_ref: &ContentRef,
        languages: &[String],
        items: &[CachedItem],
    ) -> Vec<CacheRecord> {
        let cache_key = self.cache_key(provider, content_ref, languages);
        let release_key = self.release_key(content_ref);
        let now = now_unix_secs();
        items
            .iter()
            .filter_map(|item| {
                serde_json::to_value(item).ok().map(|data| CacheRecord {
                    service: cache_key.clone(),
                    hash: item.hash_key(),
                    file_name: item.file_name(),
                    size_bytes: item.size_bytes(),
                    data,
                    release_key: Some(release_key.clone()),
                    category: Some("stream".to_string()),
                    resolution: item.resolution(),
                    created_at: now,
                    updated_at: now,
                    expires_at: now + self.config.search_ttl_secs,
                })
            })
            .collect()
    }

    /// The write-back step shared by the foreground miss path and the
    /// background refresher (§4.8 step 7, §4.9).
    pub async fn write_back(&self, provider: &str, content_ref: &ContentRef, languages: &[String], result: &SearchResult) {
        let items = self.cacheable_items(provider, result);
        if items.is_empty() {
            return;
        }
        let records = self.to_cache_records(provider, content_ref, languages, &items);
        self.byte_store.upsert_bulk(records).await;
    }

    /// The full `getOrFetch` gate. `search_fn` performs the live provider
    /// dispatch on a foreground miss; `personal_fn` (if given) runs
    /// concurrently with the cache read and contributes items that are
    /// never cached and always sort ahead of (and shadow) non-personal
    /// duplicates. `build_refresh` is called unconditionally to produce the
    /// 'static future the [`Refresher`] schedules in the background — the
    /// coordinator has no provider-dispatch knowledge of its own, so the
    /// caller (the Aggregator, which owns the provider registry) supplies
    /// it, keeping the no-back-edge shape from §9.
    pub async fn get_or_fetch<S, P, R>(
        &self,
        provider: &str,
        content_ref: &ContentRef,
        languages: &[String],
        search_fn: S,
        personal_fn: Option<P>,
        refresher: &dyn Refresher,
        build_refresh: R,
    ) -> SearchResult
    where
        S: std::future::Future<Output = SearchResult>,
        P: std::future::Future<Output = Vec<PersonalFile>>,
        R: FnOnce() -> crate::background_refresher::RefreshFuture,
    {
        let cache_key = self.cache_key(provider, content_ref, languages);

        let (cached_items, personal_files) = match personal_fn {
            Some(personal_fn) => {
                let (cached, personal) = tokio::join!(self.read_cached(&cache_key), personal_fn);
                (cached, personal)
            }
            None => (self.read_cached(&cache_key).await, Vec::new()),
        };

        let sufficient = cached_items.len() >= self.config.min_results_per_service;

        let mut result = if sufficient {
            Self::to_search_result(cached_items)
        } else {
            let live = search_fn.await;
            self.write_back(provider, content_ref, languages, &live).await;
            live
        };

        result.personal_files = personal_files;

        refresher.trigger(cache_key, build_refresh());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use streamrelay_core::cache::ByteStoreConfig;
    use streamrelay_core::test_helpers::{movie_ref, TorrentFixture};
    use std::time::Duration;

    struct NoopRefresher;
    impl Refresher for NoopRefresher {
        fn trigger(&self, _cache_key: String, _refresh: crate::background_refresher::RefreshFuture) {}
    }

    async fn coordinator() -> CacheCoordinator {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(include_str!("../../migrations/20260101000000_byte_store.sql"))
            .execute(&pool)
            .await
            .unwrap();
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
        CacheCoordinator::new(
            byte_store,
            Arc::new(KeyBuilder::new("v1")),
            UrlCachingWhitelist::new(["http_hoster".to_string()]),
            CacheCoordinatorConfig {
                min_results_per_service: 1,
                search_ttl_secs: 3600,
            },
        )
    }

    #[tokio::test]
    async fn miss_runs_live_search_and_writes_back() {
        let coordinator = coordinator().await;
        let content_ref = movie_ref("tt0111161");
        let refresher = NoopRefresher;

        let result = coordinator
            .get_or_fetch(
                "indexer",
                &content_ref,
                &[],
                async { SearchResult::torrents(vec![TorrentFixture::new("abc123").build()]) },
                None::<std::future::Ready<Vec<PersonalFile>>>,
                &refresher,
                || Box::pin(async { Ok(()) }),
            )
            .await;

        assert_eq!(result.torrents.len(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cache_key = coordinator.cache_key("indexer", &content_ref, &[]);
        let rows = coordinator.byte_store.get_by_service(&cache_key).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn http_stream_from_non_whitelisted_provider_is_not_cached() {
        let coordinator = coordinator().await;
        let content_ref = movie_ref("tt0111161");
        let result = SearchResult::http_streams(vec![HttpStream {
            provider_label: "indexer".into(),
            display_title: "Movie".into(),
            size_bytes: Some(1),
            resolution: Some("1080p".into()),
            opaque_url: "https://hoster.example/abc".into(),
        }]);

        let items = coordinator.cacheable_items("indexer", &result);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn http_stream_from_whitelisted_provider_is_cached() {
        let coordinator = coordinator().await;
        let result = SearchResult::http_streams(vec![HttpStream {
            provider_label: "http_hoster".into(),
            display_title: "Movie".into(),
            size_bytes: Some(1),
            resolution: Some("1080p".into()),
            opaque_url: "https://hoster.example/abc".into(),
        }]);

        let items = coordinator.cacheable_items("http_hoster", &result);
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn sufficient_cache_skips_live_search() {
        let coordinator = coordinator().await;
        let content_ref = movie_ref("tt0111161");
        let refresher = NoopRefresher;

        coordinator
            .write_back(
                "indexer",
                &content_ref,
                &[],
                &SearchResult::torrents(vec![TorrentFixture::new("abc123").build()]),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let live_called = std::cell::Cell::new(false);
        let result = coordinator
            .get_or_fetch(
                "indexer",
                &content_ref,
                &[],
                async {
                    live_called.set(true);
                    SearchResult::default()
                },
                None::<std::future::Ready<Vec<PersonalFile>>>,
                &refresher,
                || Box::pin(async { Ok(()) }),
            )
            .await;

        assert_eq!(result.torrents.len(), 1);
        assert!(!live_called.get());
    }
}
