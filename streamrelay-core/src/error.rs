use thiserror::Error;

use crate::provider::ProviderError;

/// Top-level error type for the aggregation core.
///
/// Per the propagation policy, only [`Error::Config`] is allowed to surface
/// as a request-level failure; every other variant is absorbed internally
/// by the component that produced it (logged, collapsed to an empty/None
/// contribution).
#[derive(Error, Debug)]
pub enum Error {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors from the durable cache layer (ByteStore).
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("write queue is full")]
    QueueFull,

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("not found")]
    NotFound,
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CacheError::NotFound,
            other => CacheError::Database(other),
        }
    }
}

/// Errors from the Resolver's backend state machines.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no provider registered for {0}")]
    NoSuchProvider(String),

    #[error("hash reported cached is actually still downloading")]
    NotCached,

    #[error("provider rejected the resolve: {0}")]
    ProviderRejected(String),

    #[error("resolve timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
