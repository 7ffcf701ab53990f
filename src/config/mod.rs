// src/config/mod.rs
pub mod oracle;
pub mod pipeline;
pub mod sources;

pub use oracle::OracleConfig;
pub use pipeline::PipelineConfig;
pub use sources::{load_registry_default, load_registry_from, SourcePolicy, SourceRegistry};
