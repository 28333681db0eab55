//! sitevault — recursive, browser-driven web archiving orchestrator.
//!
//! The crate coordinates everything between an operator command and the
//! final archive file: the recursion policy deciding which discovered links
//! are fetched, a per-job concurrency-bounded scheduler, the job lifecycle
//! state machine, a line-based control channel (`a` / `s` / `r`) and a
//! tagged status broadcast bus for external monitors. Pages themselves are
//! captured by workers driving Chromium over CDP; tests substitute scripted
//! fetchers through the [`worker::PageFetcher`] seam.

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod job;
pub mod output;
pub mod policy;
pub mod scheduler;
pub mod utils;
pub mod worker;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{ControlError, FetchError, PolicyError};
pub use events::{StatusBus, StatusEvent, StreamMonitor};
pub use job::{Job, JobId, JobManager, JobState, Stats};
pub use policy::RecursionPolicy;
pub use worker::{ChromiumFetcher, PageFetcher};
