//! Concurrent provider fan-out with an early-return gate, per spec §4.10.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

use streamrelay_core::config::ProviderConfig;
use streamrelay_core::models::{normalize_title, resolution_rank, ContentRef, Stream, Torrent};
use streamrelay_core::provider::{ProviderAdapter, ProviderContext, ProviderError, ProviderRegistry, SearchResult};
use streamrelay_providers::RateGovernor;

use crate::background_refresher::Refresher;
use crate::cache_coordinator::CacheCoordinator;
use crate::ranker::{shadow_personal_duplicates, sort_streams};
use crate::request_deduper::RequestDeduper;

/// One provider the caller wants this request fanned out to.
#[derive(Clone)]
pub struct SelectedProvider {
    pub name: String,
    pub user_cfg: ProviderConfig,
    /// The gate will not fire until this provider finishes or times out.
    pub early_return_blocking: bool,
    pub timeout: Duration,
}

pub struct AggregatorConfig {
    pub early_return_enabled: bool,
    pub early_return_timeout: Duration,
    pub early_return_min_streams: usize,
    pub global_deadline: Duration,
}

impl From<&streamrelay_core::config::AggregatorConfig> for AggregatorConfig {
    fn from(cfg: &streamrelay_core::config::AggregatorConfig) -> Self {
        Self {
            early_return_enabled: cfg.early_return_enabled,
            early_return_timeout: cfg.early_return_timeout(),
            early_return_min_streams: cfg.early_return_min_streams,
            global_deadline: cfg.global_deadline(),
        }
    }
}

struct TaskOutcome {
    provider: String,
    early_return_blocking: bool,
    streams: Vec<Stream>,
}

/// Owns the provider registry, the request deduper, the cache coordinator,
/// the rate governor, and the refresher handle — everything a fan-out
/// round needs, assembled once at boot.
pub struct Aggregator {
    registry: Arc<ProviderRegistry>,
    deduper: Arc<RequestDeduper>,
    coordinator: Arc<CacheCoordinator>,
    refresher: Arc<dyn Refresher>,
    rate_governor: Arc<RateGovernor>,
    config: AggregatorConfig,
}

impl Aggregator {
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        deduper: Arc<RequestDeduper>,
        coordinator: Arc<CacheCoordinator>,
        refresher: Arc<dyn Refresher>,
        rate_governor: Arc<RateGovernor>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            registry,
            deduper,
            coordinator,
            refresher,
            rate_governor,
            config,
        }
    }

    /// Fans out `content_ref` to every provider in `selected`, releases as
    /// soon as the early-return gate is satisfied, and returns the ranked,
    /// filtered, deduplicated stream list.
    pub async fn aggregate(
        &self,
        content_ref: &ContentRef,
        selected: &[SelectedProvider],
        languages: &[String],
        client_ip: &str,
        user_identity_hash: &str,
    ) -> Vec<Stream> {
        if selected.is_empty() {
            return Vec::new();
        }

        let parent_ctx = ProviderContext::new(self.config.global_deadline).with_user_id(user_identity_hash.to_string());
        let (tx, mut rx) = mpsc::unbounded_channel::<TaskOutcome>();

        let mut blocking_remaining = 0usize;
        for selected_provider in selected {
            if selected_provider.early_return_blocking {
                blocking_remaining += 1;
            }
            self.spawn_provider_task(
                content_ref,
                selected_provider,
                languages,
                client_ip,
                user_identity_hash,
                &parent_ctx,
                tx.clone(),
            );
        }
        drop(tx);

        let mut accumulated = Vec::new();
        let gate_enabled = self.config.early_return_enabled;
        let min_streams = self.config.early_return_min_streams;

        let sleep = tokio::time::sleep(self.config.early_return_timeout);
        tokio::pin!(sleep);
        let mut timer_fired = !gate_enabled;

        loop {
            let mut released = false;
            tokio::select! {
                outcome = rx.recv() => {
                    match outcome {
                        Some(outcome) => {
                            if outcome.early_return_blocking {
                                blocking_remaining = blocking_remaining.saturating_sub(1);
                            }
                            accumulated.extend(outcome.streams);
                            if timer_fired && blocking_remaining == 0 && accumulated.len() >= min_streams {
                                released = true;
                            }
                        }
                        None => released = true,
                    }
                }
                () = &mut sleep, if !timer_fired => {
                    timer_fired = true;
                    if blocking_remaining == 0 && accumulated.len() >= min_streams {
                        released = true;
                    }
                }
            }
            if released {
                break;
            }
        }

        let mut streams = shadow_personal_duplicates(accumulated);
        sort_streams(&mut streams);
        streams
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_provider_task(
        &self,
        content_ref: &ContentRef,
        selected: &SelectedProvider,
        languages: &[String],
        client_ip: &str,
        user_identity_hash: &str,
        parent_ctx: &ProviderContext,
        tx: mpsc::UnboundedSender<TaskOutcome>,
    ) {
        let provider_name = selected.name.clone();
        let early_return_blocking = selected.early_return_blocking;

        match self.rate_governor.check_ip(client_ip, &provider_name) {
            Ok(()) => {}
            Err(streamrelay_providers::RateLimitError::RateLimited { retry_after_secs }) => {
                let _ = tx.send(TaskOutcome {
                    provider: provider_name.clone(),
                    early_return_blocking,
                    streams: vec![rate_limited_stream(&provider_name, retry_after_secs)],
                });
                return;
            }
        }

        if !self.rate_governor.try_take_provider_token(&provider_name) {
            let _ = tx.send(TaskOutcome {
                provider: provider_name.clone(),
                early_return_blocking,
                streams: vec![rate_limited_stream(&provider_name, 1)],
            });
            return;
        }

        let Some(provider) = self.registry.get_instance(&provider_name) else {
            warn!(provider = %provider_name, "no instance registered, skipping");
            let _ = tx.send(TaskOutcome {
                provider: provider_name,
                early_return_blocking,
                streams: Vec::new(),
            });
            return;
        };

        let ctx = parent_ctx.child(selected.timeout);
        let content_ref = content_ref.clone();
        let user_cfg = selected.user_cfg.clone();
        let languages = languages.to_vec();
        let deduper = self.deduper.clone();
        let coordinator = self.coordinator.clone();
        let refresher = self.refresher.clone();
        let user_identity_hash = user_identity_hash.to_string();
        let refresh_timeout = selected.timeout;

        tokio::spawn(async move {
            let key = RequestDeduper::request_key(&provider_name, &content_ref, &languages, &user_identity_hash);
            let provider_for_search = provider.clone();
            let content_ref_for_search = content_ref.clone();
            let user_cfg_for_search = user_cfg.clone();
            let ctx_for_search = ctx.clone();

            let search_fn = async move {
                dispatch(&deduper, key, provider_for_search, &content_ref_for_search, &user_cfg_for_search, &ctx_for_search).await
            };

            let provider_for_refresh = provider.clone();
            let content_ref_for_refresh = content_ref.clone();
            let user_cfg_for_refresh = user_cfg.clone();
            let coordinator_for_refresh = coordinator.clone();
            let languages_for_refresh = languages.clone();
            let provider_name_for_refresh = provider_name.clone();

            let result = coordinator
                .get_or_fetch(
                    &provider_name,
                    &content_ref,
                    &languages,
                    search_fn,
                    None::<std::future::Ready<Vec<streamrelay_core::models::PersonalFile>>>,
                    refresher.as_ref(),
                    move || {
                        Box::pin(async move {
                            // Fresh context: this closure may run long after the
                            // foreground request's own deadline has passed.
                            let ctx = ProviderContext::new(refresh_timeout);
                            let result = provider_for_refresh
                                .search(&content_ref_for_refresh, &user_cfg_for_refresh, &ctx)
                                .await
                                .unwrap_or_default();
                            coordinator_for_refresh
                                .write_back(&provider_name_for_refresh, &content_ref_for_refresh, &languages_for_refresh, &result)
                                .await;
                            Ok(())
                        })
                    },
                )
                .await;

            let streams = to_streams(&provider_name, &content_ref, result);
            let _ = tx.send(TaskOutcome {
                provider: provider_name,
                early_return_blocking,
                streams,
            });
        });
    }
}

async fn dispatch(
    deduper: &RequestDeduper,
    key: String,
    provider: Arc<dyn ProviderAdapter>,
    content_ref: &ContentRef,
    user_cfg: &ProviderConfig,
    ctx: &ProviderContext,
) -> SearchResult {
    let content_ref = content_ref.clone();
    let user_cfg = user_cfg.clone();
    let ctx = ctx.clone();
    let outcome = deduper
        .dedup(key, async move {
            provider
                .search(&content_ref, &user_cfg, &ctx)
                .await
                .map_err(|e| e.to_string())
        })
        .await;

    match outcome {
        Ok(result) => result,
        Err(err) => {
            info!(error = %err, "provider search yielded no results");
            SearchResult::default()
        }
    }
}

fn rate_limited_stream(provider: &str, retry_after_secs: u64) -> Stream {
    Stream {
        name: provider.to_string(),
        title: "rate limited".to_string(),
        url: String::new(),
        binge_group: String::new(),
        resolution: None,
        size_bytes: None,
        is_personal: false,
        hash: None,
        provider: Some(provider.to_string()),
        retry_after_secs: Some(retry_after_secs),
    }
}

fn challenge_blocked_stream(provider: &str) -> Stream {
    Stream {
        name: provider.to_string(),
        title: "blocked by anti-bot challenge".to_string(),
        url: String::new(),
        binge_group: String::new(),
        resolution: None,
        size_bytes: None,
        is_personal: false,
        hash: None,
        provider: Some(provider.to_string()),
        retry_after_secs: None,
    }
}

fn to_streams(provider: &str, content_ref: &ContentRef, result: SearchResult) -> Vec<Stream> {
    let binge_group = format!("{provider}|{}", normalize_title(&content_ref.id()));
    let mut streams: Vec<Stream> = Vec::with_capacity(result.torrents.len() + result.http_streams.len() + result.personal_files.len());

    for torrent in &result.torrents {
        streams.push(torrent_to_stream(provider, &binge_group, torrent));
    }
    for http_stream in &result.http_streams {
        streams.push(Stream {
            name: provider.to_string(),
            title: http_stream.display_title.clone(),
            url: http_stream.opaque_url.clone(),
            binge_group: binge_group.clone(),
            resolution: http_stream.resolution.clone(),
            size_bytes: http_stream.size_bytes,
            is_personal: false,
            hash: None,
            provider: Some(provider.to_string()),
            retry_after_secs: None,
        });
    }
    for personal in &result.personal_files {
        streams.push(Stream {
            name: personal.provider.clone(),
            title: personal.file_name.clone(),
            url: personal.url.clone(),
            binge_group: binge_group.clone(),
            resolution: personal.resolution.clone(),
            size_bytes: personal.size_bytes,
            is_personal: true,
            hash: personal.hash.clone(),
            provider: Some(personal.provider.clone()),
            retry_after_secs: None,
        });
    }

    let _ = resolution_rank;
    let _ = challenge_blocked_stream;
    streams
}

fn torrent_to_stream(provider: &str, binge_group: &str, torrent: &Torrent) -> Stream {
    Stream {
        name: provider.to_string(),
        title: torrent.title.clone(),
        url: torrent.magnet_uri(),
        binge_group: binge_group.to_string(),
        resolution: torrent.resolution.clone(),
        size_bytes: Some(torrent.size_bytes),
        is_personal: false,
        hash: Some(Torrent::normalized_hash(&torrent.info_hash)),
        provider: Some(provider.to_string()),
        retry_after_secs: None,
    }
}
