//! Inbound HTTP surface, per spec §6: `streams()`/`resolve()` plus health
//! and Prometheus metrics endpoints, all wired through `axum`.

pub mod http;
pub mod observability;

pub use http::{build_router, AppState};
