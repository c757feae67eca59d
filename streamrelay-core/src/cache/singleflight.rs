//! Singleflight for cache stampede protection
//!
//! Wraps the `async_singleflight` crate to prevent cache stampede (thundering herd)
//! by ensuring that only one request executes for a given key when multiple
//! concurrent requests miss the cache simultaneously.
//!
//! # Example
//! ```
//! use streamrelay_core::cache::SingleFlight;
//!
//! # async fn example() {
//! let sf = SingleFlight::<String, String, String>::new();
//! let result = sf.do_work("user:123", async {
//!     Ok("user_data".to_string())
//! }).await;
//! # }
//! ```

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Error type for SingleFlight operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleFlightError<E> {
    /// The worker task panicked or was cancelled
    #[error("SingleFlight worker failed - leader dropped or panicked")]
    WorkerFailed,
    /// The underlying operation failed
    #[error("{0}")]
    Inner(E),
}

/// SingleFlight prevents duplicate concurrent function executions.
///
/// When multiple tasks attempt to execute the same operation (by key)
/// simultaneously, only one execution proceeds while others wait for the result.
///
/// Backed by the `async_singleflight` crate which handles leader failure
/// and automatic retry.
#[derive(Clone)]
pub struct SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    group: Arc<async_singleflight::Group<K, V, E>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new SingleFlight instance
    pub fn new() -> Self {
        Self {
            group: Arc::new(async_singleflight::Group::new()),
        }
    }

    /// Execute a function only once for a given key
    ///
    /// If another call for the same key is in progress, this will wait for
    /// that result instead of executing the function again.
    ///
    /// Uses `work()` which automatically retries if the leader is dropped.
    /// Returns `Err(None)` from the library maps to `WorkerFailed`.
    pub async fn do_work<Fut>(&self, key: K, f: Fut) -> Result<V, SingleFlightError<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        // Group::work returns Result<V, Option<E>>:
        //   Ok(v)       => success
        //   Err(Some(e)) => inner error from the function
        //   Err(None)    => leader failed/dropped (after retry attempts)
        self.group.work(&key, f).await.map_err(|opt_err| match opt_err {
            Some(inner) => SingleFlightError::Inner(inner),
            None => SingleFlightError::WorkerFailed,
        })
    }

    /// Execute a function only once for a given key, with legacy error type
    ///
    /// Converts `SingleFlightError` back to `E` using the provided error factory
    /// for worker failures.
    pub async fn do_work_with_fallback<Fut, Ef>(
        &self,
        key: K,
        f: Fut,
        error_factory: Ef,
    ) -> Result<V, E>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
        Ef: FnOnce() -> E,
    {
        self.do_work(key, f).await.map_err(|e| match e {
            SingleFlightError::WorkerFailed => error_factory(),
            SingleFlightError::Inner(err) => err,
        })
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
