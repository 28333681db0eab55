//! Orchestrator configuration: types and builder.

pub mod builder;
pub mod types;

pub use builder::{OrchestratorConfigBuilder, WithDestDir};
pub use types::OrchestratorConfig;
