pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod resilience;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use cache::KeyBuilder;
pub use config::Config;
pub use error::{Error, Result};
