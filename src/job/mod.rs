//! Job identity, records and the lifecycle manager.

pub mod id;
pub mod manager;
pub mod types;

pub use id::JobId;
pub use manager::{ArchiveRequest, Command, JobManager, ManagerConfig};
pub use types::{AbortReason, Cookie, IllegalTransition, Job, JobState, Stats};
