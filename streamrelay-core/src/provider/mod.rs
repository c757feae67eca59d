//! Provider system.
//!
//! A `ProviderAdapter` is one backend: a torrent-indexer scraper, a debrid
//! service, an HTTP hoster, or a Usenet indexer. Reference adapters live
//! in the `streamrelay-providers` crate and register themselves against
//! [`ProviderRegistry`] at startup; this crate only defines the contract.

pub mod context;
pub mod error;
pub mod registry;
pub mod traits;

pub use context::*;
pub use error::*;
pub use registry::*;
pub use traits::*;

/// Parse a `serde_json::Value` into a typed source config.
///
/// Common helper for adapter-side `TryFrom<&Value>` implementations.
pub fn parse_source_config<T: serde::de::DeserializeOwned>(
    value: &serde_json::Value,
    provider_name: &str,
) -> std::result::Result<T, ProviderError> {
    serde_json::from_value(value.clone()).map_err(|e| {
        ProviderError::InvalidConfig(format!("failed to parse {provider_name} source config: {e}"))
    })
}
