//! Request-time orchestration: fan-out, caching, ranking, and resolve
//! state machines built on top of `streamrelay-core`'s provider and cache
//! primitives.

pub mod aggregator;
pub mod background_refresher;
pub mod cache_coordinator;
pub mod ranker;
pub mod request_deduper;
pub mod resolver;

pub use aggregator::{Aggregator, AggregatorConfig, SelectedProvider};
pub use background_refresher::{BackgroundRefresher, BackgroundRefresherConfig, Refresher};
pub use cache_coordinator::{CacheCoordinator, CacheCoordinatorConfig, UrlCachingWhitelist};
pub use request_deduper::RequestDeduper;
pub use resolver::{ResolveOutcome, Resolver, ResolverConfig};
