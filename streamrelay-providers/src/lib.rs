//! Reference `ProviderAdapter` implementations and the `RateGovernor`.
//!
//! Everything here is a concrete backend built against the contracts
//! defined in `streamrelay_core::provider`: a torrent-indexer scraper, a
//! RealDebrid-class debrid service, and an HTTP-hoster adapter that
//! delegates hostile-origin handling to `streamrelay-proxy`. These serve
//! both as the production provider set and as fixtures the rest of the
//! workspace's integration tests register against.

pub mod http_hoster;
pub mod rate_governor;
pub mod real_debrid;
pub mod torrent_indexer;

pub use http_hoster::HttpHosterProvider;
pub use rate_governor::{RateGovernor, RateLimitError};
pub use real_debrid::RealDebridProvider;
pub use torrent_indexer::TorrentIndexerProvider;
