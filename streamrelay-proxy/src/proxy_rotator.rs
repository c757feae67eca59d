//! SOCKS5 proxy pool + racing request dispatch, per spec §4.3.
//!
//! The pool is refreshed from `source_urls` on a schedule with a single
//! in-flight fetch; per-proxy failure counts permanently blacklist a
//! proxy once they cross `max_failures`. `request_with_rotation` fires
//! `batch_size` attempts at once across distinct proxies, front-loading
//! the known-good set, and returns as soon as one succeeds — the rest
//! are dropped (and with them, their in-flight sockets) rather than
//! explicitly cancelled, since nothing is polling them once the
//! `FuturesUnordered` they live in is dropped.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use thiserror::Error;

use streamrelay_core::config::ProxyConfig;

#[derive(Debug, Error)]
pub enum ProxyRotatorError {
    #[error("no proxies available")]
    PoolExhausted,
    #[error("every candidate proxy failed")]
    AllAttemptsFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub ip: String,
    pub port: u16,
}

impl ProxyEndpoint {
    fn key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    fn socks5_url(&self) -> String {
        format!("socks5://{}:{}", self.ip, self.port)
    }
}

struct ProxyState {
    endpoint: ProxyEndpoint,
    failures: AtomicU32,
    blacklisted: std::sync::atomic::AtomicBool,
    last_success_ms: AtomicU64,
}

/// Owns the pool, the blacklist, and the known-good ordering.
pub struct ProxyRotator {
    states: DashMap<String, Arc<ProxyState>>,
    last_refresh: parking_lot::Mutex<Option<Instant>>,
    refreshing: tokio::sync::Mutex<()>,
    http: reqwest::Client,
    config: ProxyConfig,
}

impl ProxyRotator {
    #[must_use]
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            states: DashMap::new(),
            last_refresh: parking_lot::Mutex::new(None),
            refreshing: tokio::sync::Mutex::new(()),
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Refreshes the pool from `source_urls` if the refresh interval has
    /// elapsed, coalescing concurrent callers onto a single fetch.
    pub async fn ensure_fresh(&self) {
        let needs_refresh = {
            let guard = self.last_refresh.lock();
            guard.map_or(true, |t| t.elapsed() >= Duration::from_secs(self.config.refresh_interval_secs))
        };
        if !needs_refresh {
            return;
        }

        let _permit = self.refreshing.lock().await;
        let still_needs_refresh = {
            let guard = self.last_refresh.lock();
            guard.map_or(true, |t| t.elapsed() >= Duration::from_secs(self.config.refresh_interval_secs))
        };
        if !still_needs_refresh {
            return;
        }

        for source_url in &self.config.source_urls {
            if let Ok(text) = self.fetch_source(source_url).await {
                for endpoint in parse_endpoint_list(&text) {
                    self.states.entry(endpoint.key()).or_insert_with(|| {
                        Arc::new(ProxyState {
                            endpoint: endpoint.clone(),
                            failures: AtomicU32::new(0),
                            blacklisted: std::sync::atomic::AtomicBool::new(false),
                            last_success_ms: AtomicU64::new(0),
                        })
                    });
                }
            }
        }
        *self.last_refresh.lock() = Some(Instant::now());
    }

    async fn fetch_source(&self, source_url: &str) -> Result<String, reqwest::Error> {
        self.http.get(source_url).send().await?.text().await
    }

    fn candidate_batch(&self, exclude: &std::collections::HashSet<String>, batch_size: usize) -> Vec<Arc<ProxyState>> {
        let mut known_good: Vec<Arc<ProxyState>> = self
            .states
            .iter()
            .filter(|e| !e.blacklisted.load(Ordering::Relaxed) && !exclude.contains(e.key()) && e.last_success_ms.load(Ordering::Relaxed) > 0)
            .map(|e| e.value().clone())
            .collect();
        known_good.sort_by_key(|s| std::cmp::Reverse(s.last_success_ms.load(Ordering::Relaxed)));
        known_good.truncate(self.config.known_good_size);

        let mut seen: std::collections::HashSet<String> = known_good.iter().map(|s| s.endpoint.key()).collect();
        let mut batch = known_good;

        for entry in self.states.iter() {
            if batch.len() >= batch_size {
                break;
            }
            let state = entry.value();
            let key = state.endpoint.key();
            if state.blacklisted.load(Ordering::Relaxed) || exclude.contains(&key) || seen.contains(&key) {
                continue;
            }
            seen.insert(key);
            batch.push(state.clone());
        }
        batch.truncate(batch_size);
        batch
    }

    fn record_success(&self, state: &ProxyState) {
        state.failures.store(0, Ordering::Relaxed);
        state.last_success_ms.store(now_ms(), Ordering::Relaxed);
    }

    fn record_failure(&self, state: &ProxyState) {
        let failures = state.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.config.max_failures {
            state.blacklisted.store(true, Ordering::Relaxed);
        }
    }

    async fn attempt(&self, state: Arc<ProxyState>, url: String, headers: Vec<(String, String)>) -> Result<(bytes::Bytes, ProxyEndpoint), (Arc<ProxyState>, ProxyAttemptError)> {
        match self.do_attempt(&state, &url, &headers).await {
            Ok(body) if body.len() >= self.config.min_valid_response_bytes => Ok((body, state.endpoint.clone())),
            Ok(_) => Err((state, ProxyAttemptError::GarbageResponse)),
            Err(e) => Err((state, ProxyAttemptError::Request(e))),
        }
    }

    async fn do_attempt(&self, state: &Arc<ProxyState>, url: &str, headers: &[(String, String)]) -> Result<bytes::Bytes, reqwest::Error> {
        let proxy = reqwest::Proxy::all(state.endpoint.socks5_url())?;
        let client = reqwest::Client::builder().proxy(proxy).timeout(Duration::from_secs(15)).build()?;
        let mut request = client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request.send().await?.bytes().await
    }

    /// Fires `batch_size` attempts in parallel per round, up to
    /// `max_batches` rounds, returning the first response that clears the
    /// garbage-response size floor.
    pub async fn request_with_rotation(&self, url: &str, headers: &[(String, String)]) -> Result<(bytes::Bytes, ProxyEndpoint), ProxyRotatorError> {
        self.ensure_fresh().await;

        let mut excluded: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut any_attempted = false;

        for _ in 0..self.config.max_batches.max(1) {
            let batch = self.candidate_batch(&excluded, self.config.batch_size.max(1));
            if batch.is_empty() {
                break;
            }

            let mut futs = FuturesUnordered::new();
            for state in &batch {
                excluded.insert(state.endpoint.key());
                any_attempted = true;
                futs.push(self.attempt(state.clone(), url.to_string(), headers.to_vec()));
            }

            while let Some(outcome) = futs.next().await {
                match outcome {
                    Ok((body, endpoint)) => {
                        if let Some(state) = self.states.get(&endpoint.key()) {
                            self.record_success(&state);
                        }
                        return Ok((body, endpoint));
                    }
                    Err((state, _e)) => self.record_failure(&state),
                }
            }
        }

        if any_attempted {
            Err(ProxyRotatorError::AllAttemptsFailed)
        } else {
            Err(ProxyRotatorError::PoolExhausted)
        }
    }
}

#[derive(Debug, Error)]
enum ProxyAttemptError {
    #[error("response below the minimum valid size")]
    GarbageResponse,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

fn parse_endpoint_list(text: &str) -> Vec<ProxyEndpoint> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let (ip, port) = line.split_once(':')?;
            Some(ProxyEndpoint {
                ip: ip.to_string(),
                port: port.parse().ok()?,
            })
        })
        .collect()
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}
