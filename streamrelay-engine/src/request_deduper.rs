//! Process-wide in-flight request coalescing, per spec §4.7.
//!
//! Two concurrent callers that hash to the same `requestKey` share one
//! underlying provider dispatch; the key is removed from the map as soon
//! as the shared future settles (handled internally by [`SingleFlight`]).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use streamrelay_core::cache::{SingleFlight, SingleFlightError};
use streamrelay_core::models::ContentRef;
use streamrelay_core::provider::SearchResult;

/// Coalesces concurrent `search` dispatches to the same provider for the
/// same content, language set, and user identity.
#[derive(Clone)]
pub struct RequestDeduper {
    inner: SingleFlight<String, SearchResult, String>,
}

impl RequestDeduper {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SingleFlight::new(),
        }
    }

    /// Deterministic hash over `(provider, contentRef, normalizedLanguages,
    /// userIdentityHash)`. `user_identity_hash` should already be a stable
    /// token (e.g. an API-key suffix) so two sessions of the same user
    /// collide while different users never do.
    #[must_use]
    pub fn request_key(
        provider: &str,
        content_ref: &ContentRef,
        languages: &[String],
        user_identity_hash: &str,
    ) -> String {
        let mut sorted_langs = languages.to_vec();
        sorted_langs.sort();

        let mut hasher = DefaultHasher::new();
        provider.hash(&mut hasher);
        content_ref.content_type().hash(&mut hasher);
        content_ref.id().hash(&mut hasher);
        sorted_langs.join(",").hash(&mut hasher);
        user_identity_hash.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Runs `search_fn` under the given key, joining an already in-flight
    /// call for the same key instead of dispatching twice.
    pub async fn dedup<Fut>(&self, key: String, search_fn: Fut) -> Result<SearchResult, SingleFlightError<String>>
    where
        Fut: std::future::Future<Output = Result<SearchResult, String>> + Send,
    {
        self.inner.do_work(key, search_fn).await
    }
}

impl Default for RequestDeduper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use streamrelay_core::test_helpers::movie_ref;

    #[test]
    fn request_key_is_stable_and_order_independent_for_languages() {
        let content_ref = movie_ref("tt0111161");
        let a = RequestDeduper::request_key(
            "realdebrid",
            &content_ref,
            &["en".to_string(), "de".to_string()],
            "user-abcd",
        );
        let b = RequestDeduper::request_key(
            "realdebrid",
            &content_ref,
            &["de".to_string(), "en".to_string()],
            "user-abcd",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn different_users_get_different_keys() {
        let content_ref = movie_ref("tt0111161");
        let a = RequestDeduper::request_key("realdebrid", &content_ref, &[], "user-a");
        let b = RequestDeduper::request_key("realdebrid", &content_ref, &[], "user-b");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn concurrent_dedup_dispatches_once() {
        let deduper = Arc::new(RequestDeduper::new());
        let counter = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let deduper = deduper.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                deduper
                    .dedup("same-key".to_string(), async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(SearchResult::default())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
