mod migrations;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use streamrelay_core::bootstrap::{init_database, load_config};
use streamrelay_core::cache::{ByteStore, ByteStoreConfig, KeyBuilder};
use streamrelay_core::logging::init_logging;
use streamrelay_core::provider::ProviderRegistry;
use streamrelay_engine::{
    Aggregator, AggregatorConfig, BackgroundRefresher, BackgroundRefresherConfig, CacheCoordinator, CacheCoordinatorConfig, Refresher, RequestDeduper, Resolver, ResolverConfig,
    UrlCachingWhitelist,
};
use streamrelay_providers::{HttpHosterProvider, RateGovernor, RealDebridProvider, TorrentIndexerProvider};
use streamrelay_proxy::{ChallengeSolver, ProxyRotator};

/// Providers whose `resolve()` returns a directly playable URL rather than
/// a backend-specific handle, and are therefore safe to persist (§4.8 step 7).
const URL_CACHEABLE_KINDS: &[&str] = &["http_hoster"];

fn register_provider_factories(registry: &mut ProviderRegistry, proxy_rotator: Arc<ProxyRotator>, challenge_solver: Arc<ChallengeSolver>) {
    registry.register_factory(
        "torrent_indexer",
        Box::new(|name, _config| Ok(Arc::new(TorrentIndexerProvider::new(name)))),
    );
    registry.register_factory(
        "real_debrid",
        Box::new(|name, _config| Ok(Arc::new(RealDebridProvider::new(name)))),
    );
    registry.register_factory(
        "http_hoster",
        Box::new(move |name, _config| Ok(Arc::new(HttpHosterProvider::new(name, proxy_rotator.clone(), challenge_solver.clone())))),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    init_logging(&config.logging)?;
    info!("streamrelay starting up");

    let pool = init_database(&config).await?;
    migrations::run_migrations(&pool).await?;

    let byte_store = ByteStore::new(pool, &ByteStoreConfig::from(&config.cache));
    let key_builder = Arc::new(KeyBuilder::from_config(&config));

    let proxy_rotator = Arc::new(ProxyRotator::new(config.proxy.clone()));
    let challenge_solver = Arc::new(ChallengeSolver::new(byte_store.clone(), KeyBuilder::from_config(&config), config.challenge.clone()));

    let mut registry = ProviderRegistry::new();
    register_provider_factories(&mut registry, proxy_rotator.clone(), challenge_solver.clone());

    for (name, provider_cfg) in &config.providers {
        if !provider_cfg.enabled {
            continue;
        }
        if let Err(e) = registry.create_instance(&provider_cfg.kind, name, serde_json::Value::Null) {
            error!(provider = %name, kind = %provider_cfg.kind, error = %e, "failed to instantiate provider");
        } else {
            info!(provider = %name, kind = %provider_cfg.kind, "provider instance registered");
        }
    }
    let registry = Arc::new(registry);

    let cacheable_instances: Vec<String> = config
        .providers
        .iter()
        .filter(|(_, cfg)| cfg.enabled && URL_CACHEABLE_KINDS.contains(&cfg.kind.as_str()))
        .map(|(name, _)| name.clone())
        .collect();
    let whitelist = UrlCachingWhitelist::new(cacheable_instances);
    let coordinator = Arc::new(CacheCoordinator::new(
        byte_store.clone(),
        key_builder.clone(),
        whitelist,
        CacheCoordinatorConfig {
            min_results_per_service: config.cache.min_results_per_service,
            search_ttl_secs: config.cache.search_ttl_secs,
        },
    ));

    let refresher: Arc<dyn Refresher> = Arc::new(BackgroundRefresher::new(BackgroundRefresherConfig::from(&config.resolve)));
    let deduper = Arc::new(RequestDeduper::new());
    let rate_governor = Arc::new(RateGovernor::new(config.rate_limit.max_requests, config.rate_limit.window_ms, config.rate_limit.cleanup_ms));

    let aggregator = Arc::new(Aggregator::new(
        registry.clone(),
        deduper,
        coordinator,
        refresher,
        rate_governor,
        AggregatorConfig::from(&config.aggregator),
    ));

    let resolver = Arc::new(Resolver::new(registry.clone(), byte_store.clone(), ResolverConfig::from(&config.cache)));

    let config = Arc::new(config);
    let state = streamrelay_api::AppState {
        config: config.clone(),
        registry,
        aggregator,
        resolver,
        byte_store,
    };

    let router = streamrelay_api::build_router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    info!("streamrelay shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
