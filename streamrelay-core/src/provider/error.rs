//! Provider error taxonomy, per spec §7 "Per-provider failure handling".

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("blocked by anti-bot challenge")]
    Challenged,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether this failure should count toward the per-provider
    /// consecutive-failure circuit breaker (§7): rate-limit and challenge
    /// responses are expected traffic-shaping signals, not provider
    /// breakage, so they're excluded.
    #[must_use]
    pub fn trips_circuit(&self) -> bool {
        !matches!(self, ProviderError::RateLimited { .. } | ProviderError::Challenged)
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
