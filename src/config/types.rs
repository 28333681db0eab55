//! Orchestrator configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::ManagerConfig;
use crate::worker::CollaboratorScript;

/// Everything the orchestrator needs at startup. Built through
/// [`OrchestratorConfigBuilder`](super::OrchestratorConfigBuilder); the
/// destination directory is the only required field.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Control channel listener.
    pub control_addr: SocketAddr,
    /// Status feed listener.
    pub feed_addr: SocketAddr,
    /// Final artifacts land here.
    pub destdir: PathBuf,
    /// Staging directory for in-progress captures.
    pub tempdir: PathBuf,
    /// Worker concurrency when an archive command names none.
    pub default_concurrency: usize,
    /// Upper bound on per-job worker concurrency.
    pub max_concurrency: usize,
    /// Whole-job deadline.
    pub job_deadline: Duration,
    /// Cooperative-cancel grace period on revoke, deadline and shutdown.
    pub grace: Duration,
    /// How long terminal jobs stay queryable.
    pub retention: Duration,
    /// Network-idle wait before snapshotting a page.
    pub idle_timeout: Duration,
    /// Hard per-page deadline.
    pub page_timeout: Duration,
    /// Per-subscriber status bus buffer.
    pub bus_capacity: usize,
    /// Run the browser headless.
    pub headless: bool,
    /// Collaborator scripts enabled for every job.
    pub scripts: Vec<CollaboratorScript>,
}

impl OrchestratorConfig {
    /// The slice of this configuration the job manager consumes.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            destdir: self.destdir.clone(),
            tempdir: self.tempdir.clone(),
            default_concurrency: self.default_concurrency,
            max_concurrency: self.max_concurrency,
            job_deadline: self.job_deadline,
            grace: self.grace,
            retention: self.retention,
            idle_timeout: self.idle_timeout,
            page_timeout: self.page_timeout,
            scripts: self.scripts.clone(),
        }
    }
}
