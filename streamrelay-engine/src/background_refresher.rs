//! Per-cache-key background refresh scheduling, per spec §4.9.
//!
//! Depends on nothing from [`crate::cache_coordinator`] — the Coordinator
//! depends on the [`Refresher`] trait here, not the other way around,
//! breaking the cycle the source system had between these components (§9).

use dashmap::DashMap;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub type RefreshFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// What [`CacheCoordinator`](crate::cache_coordinator::CacheCoordinator) and
/// the Aggregator depend on to kick off a background refresh without
/// knowing the concrete scheduler.
pub trait Refresher: Send + Sync {
    /// Schedules `refresh` to run for `cache_key` if no refresh is already
    /// in flight and the backoff window has elapsed. A no-op otherwise.
    fn trigger(&self, cache_key: String, refresh: RefreshFuture);
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    in_flight: bool,
    failures: u32,
    next_allowed_at: Instant,
}

impl Default for KeyState {
    fn default() -> Self {
        Self {
            in_flight: false,
            failures: 0,
            next_allowed_at: Instant::now(),
        }
    }
}

pub struct BackgroundRefresherConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub max_failures: u32,
}

impl From<&streamrelay_core::config::ResolveConfig> for BackgroundRefresherConfig {
    fn from(cfg: &streamrelay_core::config::ResolveConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.background_refresh_base_delay_ms),
            max_delay: Duration::from_millis(cfg.background_refresh_max_delay_ms),
            jitter: Duration::from_millis(cfg.background_refresh_jitter_ms),
            max_failures: cfg.max_refresh_failures,
        }
    }
}

/// Single-writer-per-key scheduler: at most one refresh in flight for any
/// `cacheKey` at any instant.
pub struct BackgroundRefresher {
    states: Arc<DashMap<String, KeyState>>,
    config: BackgroundRefresherConfig,
}

impl BackgroundRefresher {
    #[must_use]
    pub fn new(config: BackgroundRefresherConfig) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            config,
        }
    }

    fn backoff_delay(&self, failures: u32) -> Duration {
        let shift = failures.min(self.config.max_failures);
        let exp = self
            .config
            .base_delay
            .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        let capped = exp.min(self.config.max_delay);
        let jitter_ms = if self.config.jitter.is_zero() {
            0
        } else {
            rand::rng().random_range(0..=self.config.jitter.as_millis() as u64)
        };
        capped + Duration::from_millis(jitter_ms)
    }
}

impl Refresher for BackgroundRefresher {
    fn trigger(&self, cache_key: String, refresh: RefreshFuture) {
        let now = Instant::now();
        let failures = {
            let mut entry = self.states.entry(cache_key.clone()).or_default();
            if entry.in_flight || now < entry.next_allowed_at {
                debug!(cache_key = %cache_key, "background refresh skipped, in flight or backing off");
                return;
            }
            entry.in_flight = true;
            entry.failures
        };

        let delay = self.backoff_delay(failures);
        let states = self.states.clone();
        tokio::spawn(async move {
            let outcome = refresh.await;
            let mut entry = states.entry(cache_key.clone()).or_default();
            entry.in_flight = false;
            match outcome {
                Ok(()) => entry.failures = 0,
                Err(err) => {
                    warn!(cache_key = %cache_key, error = %err, "background refresh failed");
                    entry.failures = (entry.failures + 1).min(6);
                }
            }
            entry.next_allowed_at = Instant::now() + delay;
        });
    }
}
