//! Turns an opaque `{provider, opaqueRef}` into a playable URL, per spec
//! §4.11 and the debrid/challenge state machines in §4.13.
//!
//! The per-backend polling machinery (addMagnet → selectFiles → poll →
//! unrestrict) lives inside each concrete [`ProviderAdapter::resolve`]
//! implementation; this module owns everything around that call: the
//! `resolveKey` derivation, the in-flight/success/failure caches, and the
//! stale-cache eviction path ([`is_stale_cache_error`]) for when a cache
//! hint claimed a hash was instantly available but the backend reports it
//! still downloading.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use streamrelay_core::cache::{ByteStore, MemCache, SingleFlight, SingleFlightError};
use streamrelay_core::config::ProviderConfig;
use streamrelay_core::error::ResolveError;
use streamrelay_core::models::ResolveKey;
use streamrelay_core::provider::{ProviderContext, ProviderError, ProviderRegistry};

pub struct ResolverConfig {
    pub success_ttl: Duration,
    pub fail_ttl: Duration,
}

impl From<&streamrelay_core::config::CacheConfig> for ResolverConfig {
    fn from(cfg: &streamrelay_core::config::CacheConfig) -> Self {
        Self {
            success_ttl: cfg.resolve_success_ttl(),
            fail_ttl: cfg.resolve_fail_ttl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Url(String),
    NotCached,
}

/// What the caller believes about this content hash going in — whether a
/// prior `probe_cached` call reported it instantly available. Feeds the
/// `EVICT_AND_FAIL` transition in §4.13 when the provider discovers that
/// claim was stale.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveHint {
    pub claimed_cached: bool,
}

/// Coalesces concurrent resolves for the same `resolveKey`, consults the
/// in-process success/failure caches first, and evicts stale durable-cache
/// rows when a backend reports a hash it no longer actually holds.
pub struct Resolver {
    registry: Arc<ProviderRegistry>,
    byte_store: Arc<ByteStore>,
    mem_cache: MemCache,
    in_flight: SingleFlight<ResolveKey, String, String>,
}

impl Resolver {
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, byte_store: Arc<ByteStore>, config: ResolverConfig) -> Self {
        Self {
            registry,
            byte_store,
            mem_cache: MemCache::new(config.success_ttl, config.fail_ttl),
            in_flight: SingleFlight::new(),
        }
    }

    fn api_key_tail(user_cfg: &ProviderConfig) -> String {
        match &user_cfg.api_key {
            Some(key) if key.len() > 4 => key[key.len() - 4..].to_string(),
            Some(key) => key.clone(),
            None => String::new(),
        }
    }

    /// §4.11 step 1–3. `cache_key` is the same search cache key the
    /// `CacheCoordinator` wrote this hash's row under — it scopes the
    /// durable-cache row to delete on an `EVICT_AND_FAIL` transition.
    pub async fn resolve(
        &self,
        provider_name: &str,
        opaque_ref: &str,
        content_hash: &str,
        cache_key: &str,
        user_cfg: &ProviderConfig,
        hint: ResolveHint,
        ctx: &ProviderContext,
    ) -> Result<ResolveOutcome, ResolveError> {
        let resolve_key = ResolveKey::new(provider_name, Self::api_key_tail(user_cfg), content_hash);

        if let Some(entry) = self.mem_cache.get_resolve_success(&resolve_key).await {
            return Ok(ResolveOutcome::Url(entry.url));
        }
        if self.mem_cache.has_recent_failure(&resolve_key).await {
            return Ok(ResolveOutcome::NotCached);
        }

        let Some(provider) = self.registry.get_instance(provider_name) else {
            return Err(ResolveError::NoSuchProvider(provider_name.to_string()));
        };

        let key_for_join = resolve_key.clone();
        let opaque_ref = opaque_ref.to_string();
        let user_cfg = user_cfg.clone();
        let ctx = ctx.clone();

        let outcome = self
            .in_flight
            .do_work(key_for_join, async move {
                provider
                    .resolve(&opaque_ref, &user_cfg, &ctx)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;

        match outcome {
            Ok(Some(url)) => {
                self.mem_cache.put_resolve_success(resolve_key, url.clone()).await;
                Ok(ResolveOutcome::Url(url))
            }
            Ok(None) => {
                self.mem_cache.put_resolve_failure(resolve_key).await;
                Ok(ResolveOutcome::NotCached)
            }
            Err(SingleFlightError::WorkerFailed) => {
                self.mem_cache.put_resolve_failure(resolve_key).await;
                Ok(ResolveOutcome::NotCached)
            }
            Err(SingleFlightError::Inner(err)) => self.handle_failure(provider_name, content_hash, cache_key, hint, resolve_key, err).await,
        }
    }

    async fn handle_failure(
        &self,
        provider_name: &str,
        content_hash: &str,
        cache_key: &str,
        hint: ResolveHint,
        resolve_key: ResolveKey,
        err: String,
    ) -> Result<ResolveOutcome, ResolveError> {
        if hint.claimed_cached && err.contains("still downloading") {
            warn!(provider = %provider_name, hash = %content_hash, "cache hint claimed cached but backend reports still downloading, evicting");
            self.byte_store.delete(cache_key, content_hash).await;
            self.mem_cache.put_resolve_failure(resolve_key).await;
            return Ok(ResolveOutcome::NotCached);
        }

        self.mem_cache.put_resolve_failure(resolve_key).await;
        info!(provider = %provider_name, error = %err, "resolve failed");
        Err(ResolveError::ProviderRejected(err))
    }
}

/// Translates a provider-reported `ProviderError` into the string the
/// resolve state machine inspects for the stale-cache signal.
#[must_use]
pub fn is_stale_cache_error(err: &ProviderError) -> bool {
    matches!(err, ProviderError::Parse(msg) if msg.contains("still downloading"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicU32, Ordering};
    use streamrelay_core::cache::ByteStoreConfig;
    use streamrelay_core::models::ContentRef;
    use streamrelay_core::provider::{ProviderAdapter, SearchResult};

    struct DebridLike {
        calls: Arc<AtomicU32>,
        result: Option<String>,
        err: Option<String>,
    }

    #[async_trait]
    impl ProviderAdapter for DebridLike {
        fn name(&self) -> &str {
            "realdebrid"
        }
        async fn search(&self, _content_ref: &ContentRef, _user_cfg: &ProviderConfig, _ctx: &ProviderContext) -> Result<SearchResult, ProviderError> {
            Ok(SearchResult::default())
        }
        async fn resolve(&self, _opaque_ref: &str, _user_cfg: &ProviderConfig, _ctx: &ProviderContext) -> Result<Option<String>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.err {
                return Err(ProviderError::Parse(err.clone()));
            }
            Ok(self.result.clone())
        }
    }

    async fn resolver_with(provider: DebridLike) -> Resolver {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::query(include_str!("../../migrations/20260101000000_byte_store.sql")).execute(&pool).await.unwrap();
        let byte_store = Arc::new(ByteStore::new(
            pool,
            &ByteStoreConfig {
                upsert_concurrency: 2,
                upsert_queue_max: 50,
                max_consecutive_failures: 5,
                circuit_min_backoff: Duration::from_secs(1),
                circuit_max_backoff: Duration::from_secs(5),
            },
        ));
        let mut registry = ProviderRegistry::new();
        let calls = provider.calls.clone();
        let result = provider.result.clone();
        let err = provider.err.clone();
        registry.register_factory(
            "realdebrid",
            Box::new(move |_, _| {
                Ok(Arc::new(DebridLike {
                    calls: calls.clone(),
                    result: result.clone(),
                    err: err.clone(),
                }) as Arc<dyn ProviderAdapter>)
            }),
        );
        registry.create_instance("realdebrid", "realdebrid", serde_json::json!({})).unwrap();

        Resolver::new(
            Arc::new(registry),
            byte_store,
            ResolverConfig {
                success_ttl: Duration::from_secs(60),
                fail_ttl: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn success_is_cached_and_not_redispatched() {
        let calls = Arc::new(AtomicU32::new(0));
        let resolver = resolver_with(DebridLike {
            calls: calls.clone(),
            result: Some("https://example.com/final".to_string()),
            err: None,
        })
        .await;

        let ctx = ProviderContext::new(Duration::from_secs(5));
        let user_cfg = ProviderConfig::default();

        for _ in 0..2 {
            let outcome = resolver
                .resolve("realdebrid", "magnet:?xt=abc", "abcd1234", "movie:tt1", &user_cfg, ResolveHint::default(), &ctx)
                .await
                .unwrap();
            assert_eq!(outcome, ResolveOutcome::Url("https://example.com/final".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_cache_hint_evicts_and_returns_not_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let resolver = resolver_with(DebridLike {
            calls: calls.clone(),
            result: None,
            err: Some("hash reported cached is actually still downloading".to_string()),
        })
        .await;

        let ctx = ProviderContext::new(Duration::from_secs(5));
        let user_cfg = ProviderConfig::default();
        let hint = ResolveHint { claimed_cached: true };

        let outcome = resolver
            .resolve("realdebrid", "magnet:?xt=abc", "abcd1234", "movie:tt1", &user_cfg, hint, &ctx)
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::NotCached);
    }

    #[tokio::test]
    async fn plain_failure_is_cached_and_returned_as_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let resolver = resolver_with(DebridLike {
            calls: calls.clone(),
            result: None,
            err: Some("backend unreachable".to_string()),
        })
        .await;

        let ctx = ProviderContext::new(Duration::from_secs(5));
        let user_cfg = ProviderConfig::default();

        let first = resolver
            .resolve("realdebrid", "magnet:?xt=abc", "abcd1234", "movie:tt1", &user_cfg, ResolveHint::default(), &ctx)
            .await;
        assert!(first.is_err());

        let second = resolver
            .resolve("realdebrid", "magnet:?xt=abc", "abcd1234", "movie:tt1", &user_cfg, ResolveHint::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(second, ResolveOutcome::NotCached);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_cache_error_detection() {
        assert!(is_stale_cache_error(&ProviderError::Parse("hash reported cached is actually still downloading".to_string())));
        assert!(!is_stale_cache_error(&ProviderError::Timeout));
    }
}
