//! Bootstrap helpers shared by the binary crate: configuration loading and
//! database pool initialization. Wiring the cache/proxy/provider/engine
//! layers together happens in the binary crate, which is the only place
//! that depends on every workspace crate at once.

pub mod database;
pub mod config;

pub use database::init_database;
pub use config::load_config;
