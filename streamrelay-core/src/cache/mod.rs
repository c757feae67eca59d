pub mod byte_store;
pub mod key_builder;
pub mod mem_cache;
pub mod singleflight;

pub use byte_store::{ByteStore, ByteStoreConfig, ReleaseCounts};
pub use key_builder::KeyBuilder;
pub use mem_cache::MemCache;
pub use singleflight::{SingleFlight, SingleFlightError};
