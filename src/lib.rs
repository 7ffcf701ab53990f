// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod judge;
pub mod metrics;
pub mod pacing;
pub mod pipeline;
pub mod publish;
pub mod resolve;
pub mod select;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{FetchError, OracleError};
pub use crate::pipeline::{CycleReport, Pipeline};
pub use crate::store::{Item, ItemStore, ResolutionState};
