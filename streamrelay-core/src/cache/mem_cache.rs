//! In-process TTL maps, per spec §4.2.
//!
//! Three independent maps, all process-local and lost on restart: they
//! improve consistency, they are never the source of truth.

use moka::future::Cache;
use std::time::{Duration, Instant};

use crate::models::ResolveKey;

#[derive(Debug, Clone)]
pub struct ResolveSuccessEntry {
    pub url: String,
    pub resolved_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ResolveFailureEntry {
    pub failed_at: Instant,
}

/// Holds the resolve-success and resolve-failure maps.
///
/// The in-flight map lives separately as [`crate::cache::SingleFlight`]
/// since its "join the existing computation" shape is a different access
/// pattern than a plain TTL cache.
pub struct MemCache {
    resolve_success: Cache<ResolveKey, ResolveSuccessEntry>,
    resolve_failure: Cache<ResolveKey, ResolveFailureEntry>,
}

impl MemCache {
    #[must_use]
    pub fn new(success_ttl: Duration, fail_ttl: Duration) -> Self {
        Self {
            resolve_success: Cache::builder().time_to_live(success_ttl).build(),
            resolve_failure: Cache::builder().time_to_live(fail_ttl).build(),
        }
    }

    pub async fn put_resolve_success(&self, key: ResolveKey, url: String) {
        self.resolve_success
            .insert(
                key,
                ResolveSuccessEntry {
                    url,
                    resolved_at: Instant::now(),
                },
            )
            .await;
    }

    #[must_use]
    pub async fn get_resolve_success(&self, key: &ResolveKey) -> Option<ResolveSuccessEntry> {
        self.resolve_success.get(key).await
    }

    pub async fn put_resolve_failure(&self, key: ResolveKey) {
        self.resolve_failure
            .insert(key, ResolveFailureEntry { failed_at: Instant::now() })
            .await;
    }

    /// Short-circuits a retry: `true` means a resolve attempt failed
    /// recently enough that the caller should not retry yet.
    #[must_use]
    pub async fn has_recent_failure(&self, key: &ResolveKey) -> bool {
        self.resolve_failure.get(key).await.is_some()
    }

    pub async fn clear_failure(&self, key: &ResolveKey) {
        self.resolve_failure.invalidate(key).await;
    }
}
