//! Configuration loading.

use anyhow::Result;
use tracing::{info, warn};

use crate::Config;

/// Load configuration from config file or environment variables.
///
/// Config file search order:
/// 1. `STREAMRELAY_CONFIG_PATH` environment variable (explicit path)
/// 2. `./config.yaml` (current working directory)
/// 3. `/config/config.yaml` (Kubernetes mount path)
/// 4. Fall back to environment variables only
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("STREAMRELAY_CONFIG_PATH")
        .ok()
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            std::path::Path::new(cwd)
                .exists()
                .then(|| cwd.to_string())
        })
        .or_else(|| {
            let k8s = "/config/config.yaml";
            std::path::Path::new(k8s)
                .exists()
                .then(|| k8s.to_string())
        });

    let config = if let Some(path) = config_path {
        eprintln!("loading config from {path}");
        match Config::from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("failed to load {path}: {e}, falling back to environment variables");
                Config::from_env().unwrap_or_default()
            }
        }
    } else {
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("failed to load config from environment: {e}, using defaults");
            Config::default()
        })
    };

    if config.providers.values().filter(|p| p.enabled).count() == 0 {
        warn!("no provider configured; streams() requests will fail until at least one is added");
    }

    info!(
        http_port = config.server.http_port,
        providers = config.providers.len(),
        "configuration loaded"
    );

    Ok(config)
}
