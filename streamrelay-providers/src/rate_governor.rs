//! RateGovernor, per spec §4.5.
//!
//! Two independent axes: a per-provider token bucket and a per-client-IP
//! fixed-window counter. Both are process-local — no Redis, no shared
//! state across replicas — since the spec scopes this to a single
//! process.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Simple token bucket: `capacity` tokens, refilled at `rps` tokens/sec.
struct TokenBucket {
    capacity: f64,
    rps: f64,
    tokens: parking_lot::Mutex<(f64, Instant)>,
}

impl TokenBucket {
    fn new(capacity: f64, rps: f64) -> Self {
        Self {
            capacity,
            rps,
            tokens: parking_lot::Mutex::new((capacity, Instant::now())),
        }
    }

    fn try_take(&self) -> bool {
        let mut guard = self.tokens.lock();
        let (tokens, last) = &mut *guard;
        let elapsed = last.elapsed().as_secs_f64();
        *tokens = (*tokens + elapsed * self.rps).min(self.capacity);
        *last = Instant::now();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct IpWindow {
    timestamps: VecDeque<u64>,
    last_seen_ms: u64,
}

/// Per-client-IP fixed-window counter, keyed `(ip, provider)`.
struct IpWindowLimiter {
    windows: Arc<DashMap<(String, String), IpWindow>>,
    max_requests: u32,
    window_ms: u64,
}

impl IpWindowLimiter {
    fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window_ms,
        }
    }

    fn check(&self, ip: &str, provider: &str) -> Result<(), u64> {
        let now_ms = now_ms();
        let key = (ip.to_string(), provider.to_string());
        let mut entry = self.windows.entry(key).or_insert_with(|| IpWindow {
            timestamps: VecDeque::new(),
            last_seen_ms: now_ms,
        });

        let window_start = now_ms.saturating_sub(self.window_ms);
        while entry.timestamps.front().is_some_and(|&ts| ts < window_start) {
            entry.timestamps.pop_front();
        }

        entry.last_seen_ms = now_ms;

        if entry.timestamps.len() >= self.max_requests as usize {
            let oldest = entry.timestamps.front().copied().unwrap_or(now_ms);
            let remaining_ms = self.window_ms.saturating_sub(now_ms.saturating_sub(oldest));
            return Err((remaining_ms / 1000).max(1));
        }

        entry.timestamps.push_back(now_ms);
        Ok(())
    }

    /// Drops per-IP records that have been idle past `idle_threshold`.
    fn cleanup(&self, idle_threshold: Duration) {
        let cutoff = now_ms().saturating_sub(idle_threshold.as_millis() as u64);
        self.windows.retain(|_, window| window.last_seen_ms >= cutoff);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Owns both enforcement axes and the periodic idle-record sweep.
pub struct RateGovernor {
    buckets: DashMap<String, TokenBucket>,
    ip_limiter: IpWindowLimiter,
    cleanup_interval: Duration,
    last_cleanup_ms: AtomicU64,
}

impl RateGovernor {
    #[must_use]
    pub fn new(max_requests_per_ip: u32, window_ms: u64, cleanup_ms: u64) -> Self {
        Self {
            buckets: DashMap::new(),
            ip_limiter: IpWindowLimiter::new(max_requests_per_ip, window_ms),
            cleanup_interval: Duration::from_millis(cleanup_ms),
            last_cleanup_ms: AtomicU64::new(now_ms()),
        }
    }

    /// Registers (or replaces) the token bucket for a provider.
    pub fn configure_provider(&self, provider: &str, capacity: f64, rps: f64) {
        self.buckets.insert(provider.to_string(), TokenBucket::new(capacity, rps));
    }

    /// Consumes one token from the provider's bucket. A provider with no
    /// configured bucket is treated as unthrottled.
    #[must_use]
    pub fn try_take_provider_token(&self, provider: &str) -> bool {
        self.buckets
            .get(provider)
            .map_or(true, |bucket| bucket.try_take())
    }

    /// Checks the per-IP window, running the idle sweep opportunistically
    /// when the cleanup interval has elapsed.
    pub fn check_ip(&self, ip: &str, provider: &str) -> Result<(), RateLimitError> {
        self.maybe_cleanup();
        self.ip_limiter
            .check(ip, provider)
            .map_err(|retry_after_secs| RateLimitError::RateLimited { retry_after_secs })
    }

    fn maybe_cleanup(&self) {
        let now = now_ms();
        let last = self.last_cleanup_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= self.cleanup_interval.as_millis() as u64
            && self
                .last_cleanup_ms
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.ip_limiter.cleanup(self.cleanup_interval);
        }
    }
}
