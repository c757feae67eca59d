//! Data model, per spec §3.
//!
//! `ContentRef`, `Torrent`, `HttpStream`, `PersonalFile`, `Stream`,
//! `CacheRecord`, and `ResolveKey` — the types every component downstream
//! operates on.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A content identifier: a movie or a specific series episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentRef {
    Movie {
        imdb_id: String,
        #[serde(flatten)]
        meta: ContentMeta,
    },
    Episode {
        imdb_id: String,
        season: u32,
        episode: u32,
        #[serde(flatten)]
        meta: ContentMeta,
    },
}

impl ContentRef {
    #[must_use]
    pub fn imdb_id(&self) -> &str {
        match self {
            ContentRef::Movie { imdb_id, .. } | ContentRef::Episode { imdb_id, .. } => imdb_id,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            ContentRef::Movie { .. } => "movie",
            ContentRef::Episode { .. } => "series",
        }
    }

    /// `imdbId` for movies, `imdbId:season:episode` for series — the `id`
    /// shape used by the inbound `streams()` interface (§6).
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            ContentRef::Movie { imdb_id, .. } => imdb_id.clone(),
            ContentRef::Episode {
                imdb_id,
                season,
                episode,
                ..
            } => format!("{imdb_id}:{season}:{episode}"),
        }
    }

    #[must_use]
    pub fn season_episode(&self) -> Option<(u32, u32)> {
        match self {
            ContentRef::Movie { .. } => None,
            ContentRef::Episode { season, episode, .. } => Some((*season, *episode)),
        }
    }

    #[must_use]
    pub fn meta(&self) -> &ContentMeta {
        match self {
            ContentRef::Movie { meta, .. } | ContentRef::Episode { meta, .. } => meta,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub canonical_title: Option<String>,
    pub release_year: Option<u32>,
    #[serde(default)]
    pub alternative_titles: Vec<String>,
    pub tmdb_id: Option<String>,
}

/// A torrent-indexer result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torrent {
    /// 40-hex, always lowercased and compared lowercase.
    pub info_hash: String,
    pub title: String,
    pub size_bytes: u64,
    pub seeders: u32,
    pub tracker: String,
    #[serde(default)]
    pub languages: Vec<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub quality_category: Option<String>,
}

impl Torrent {
    #[must_use]
    pub fn normalized_hash(info_hash: &str) -> String {
        info_hash.to_lowercase()
    }

    /// Derived from `info_hash` + `title`; trackers are optional suffixes
    /// intentionally omitted here (the spec treats the display name as the
    /// only required suffix).
    #[must_use]
    pub fn magnet_uri(&self) -> String {
        let encoded_title = percent_encoding::utf8_percent_encode(
            &self.title,
            percent_encoding::NON_ALPHANUMERIC,
        );
        format!("magnet:?xt=urn:btih:{}&dn={encoded_title}", self.info_hash)
    }
}

/// An HTTP file-hoster result. Has no `info_hash`; de-duplication uses
/// `(provider_label, normalized_title, size_bytes, resolution)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpStream {
    pub provider_label: String,
    pub display_title: String,
    pub size_bytes: Option<u64>,
    pub resolution: Option<String>,
    /// May require a second-stage [`crate::provider::ProviderAdapter::resolve`].
    pub opaque_url: String,
}

impl HttpStream {
    #[must_use]
    pub fn dedup_key(&self) -> (String, String, Option<u64>, Option<String>) {
        (
            self.provider_label.clone(),
            normalize_title(&self.display_title),
            self.size_bytes,
            self.resolution.clone(),
        )
    }
}

/// A file already present in a user's debrid/home-media storage.
/// Never cached in ByteStore; always sorts ahead of non-personal results
/// and shadows duplicate non-personal items sharing the same hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalFile {
    pub provider: String,
    pub file_name: String,
    pub url: String,
    pub hash: Option<String>,
    pub size_bytes: Option<u64>,
    pub resolution: Option<String>,
}

/// Output item assembled for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub name: String,
    pub title: String,
    pub url: String,
    pub binge_group: String,
    pub resolution: Option<String>,
    pub size_bytes: Option<u64>,
    pub is_personal: bool,
    pub hash: Option<String>,
    /// Provider this result came from; carried for rate-limit/informational
    /// synthetic items (§4.5, §7) even though it isn't in the presentation
    /// output of the source spec's `Stream` shape.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Set on synthetic rate-limited/challenge-failure informational items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Resolution ranking table used by the sort key (§4.12).
#[must_use]
pub fn resolution_rank(resolution: Option<&str>) -> u8 {
    match resolution.map(str::to_lowercase).as_deref() {
        Some("2160p") | Some("4k") => 4,
        Some("1080p") => 3,
        Some("720p") => 2,
        Some("480p") => 1,
        _ => 0,
    }
}

/// Persisted record, primary key `(service, hash)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub service: String,
    pub hash: String,
    pub file_name: Option<String>,
    pub size_bytes: Option<u64>,
    pub data: serde_json::Value,
    pub release_key: Option<String>,
    pub category: Option<String>,
    pub resolution: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

impl CacheRecord {
    #[must_use]
    pub fn is_expired(&self, now_unix_secs: i64) -> bool {
        self.expires_at <= now_unix_secs
    }
}

/// Scopes both the resolve success and failure caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolveKey {
    pub provider: String,
    pub api_key_tail: String,
    /// An info hash when extractable from a magnet, else the raw URL.
    pub content_key: String,
}

impl ResolveKey {
    #[must_use]
    pub fn new(provider: impl Into<String>, api_key_tail: impl Into<String>, content_key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key_tail: api_key_tail.into(),
            content_key: content_key.into(),
        }
    }
}

/// Lowercase+trim a title for dedup/matching comparisons.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[must_use]
pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_ref_id_format() {
        let movie = ContentRef::Movie {
            imdb_id: "tt0111161".to_string(),
            meta: ContentMeta::default(),
        };
        assert_eq!(movie.id(), "tt0111161");
        assert_eq!(movie.content_type(), "movie");

        let ep = ContentRef::Episode {
            imdb_id: "tt0944947".to_string(),
            season: 1,
            episode: 3,
            meta: ContentMeta::default(),
        };
        assert_eq!(ep.id(), "tt0944947:1:3");
        assert_eq!(ep.content_type(), "series");
        assert_eq!(ep.season_episode(), Some((1, 3)));
    }

    #[test]
    fn torrent_hash_is_lowercased_by_helper() {
        assert_eq!(Torrent::normalized_hash("ABCDEF0123"), "abcdef0123");
    }

    #[test]
    fn resolution_rank_orders_4k_first() {
        assert!(resolution_rank(Some("2160p")) > resolution_rank(Some("1080p")));
        assert!(resolution_rank(Some("1080p")) > resolution_rank(Some("720p")));
        assert!(resolution_rank(Some("720p")) > resolution_rank(Some("480p")));
        assert!(resolution_rank(Some("480p")) > resolution_rank(None));
    }

    #[test]
    fn http_stream_dedup_key_ignores_url() {
        let a = HttpStream {
            provider_label: "hoster".into(),
            display_title: "Movie.Title.2020".into(),
            size_bytes: Some(100),
            resolution: Some("1080p".into()),
            opaque_url: "https://a.example/1".into(),
        };
        let b = HttpStream {
            opaque_url: "https://a.example/2".into(),
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn cache_record_expiry() {
        let record = CacheRecord {
            service: "s".into(),
            hash: "h".into(),
            file_name: None,
            size_bytes: None,
            data: serde_json::json!([]),
            release_key: None,
            category: None,
            resolution: None,
            created_at: 0,
            updated_at: 0,
            expires_at: 100,
        };
        assert!(!record.is_expired(99));
        assert!(record.is_expired(100));
        assert!(record.is_expired(200));
    }
}
