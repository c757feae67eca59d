//! Stable cache key construction, per spec §6 "Persisted state layout".
//!
//! Bumping `CACHE_VERSION` invalidates all prior search caches by changing
//! every key this builder produces.

use crate::Config;

/// Builds the stable key formats used against ByteStore and MemCache.
pub struct KeyBuilder {
    cache_version: String,
}

impl KeyBuilder {
    #[must_use]
    pub fn new(cache_version: impl Into<String>) -> Self {
        Self {
            cache_version: cache_version.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache.cache_version.clone())
    }

    /// `"{normalizedProvider}-search-{VERSION}:{type}:{idWithColonsReplaced}:{languages,sorted,comma}"`
    ///
    /// Series ids (`imdbId:season:episode`) have their colons replaced with
    /// `_` so the key stays collision-safe across episodes while remaining a
    /// single path-safe segment.
    #[must_use]
    pub fn search_key(&self, provider: &str, content_type: &str, id: &str, languages: &[String]) -> String {
        let normalized_provider = provider.to_lowercase();
        let safe_id = id.replace(':', "_");
        let mut langs = languages.to_vec();
        langs.sort();
        let langs = langs.join(",");
        format!(
            "{normalized_provider}-search-{}:{content_type}:{safe_id}:{langs}",
            self.cache_version
        )
    }

    /// `"{domain}_cf_cookie"` — ByteStore hash under service `cf_cookie`.
    #[must_use]
    pub fn cookie_key(&self, domain: &str) -> String {
        format!("{domain}_cf_cookie")
    }

    /// `"{type}:{imdbId}[:S:E]"` — groups cache rows belonging to one release.
    #[must_use]
    pub fn release_key(&self, content_type: &str, imdb_id: &str, season: Option<u32>, episode: Option<u32>) -> String {
        match (season, episode) {
            (Some(s), Some(e)) => format!("{content_type}:{imdb_id}:{s}:{e}"),
            _ => format!("{content_type}:{imdb_id}"),
        }
    }
}
