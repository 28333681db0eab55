//! Job lifecycle manager.
//!
//! One manager task owns the job table and is the sole mutator of [`Job`]
//! records. Control adapters talk to it through [`Command`] messages with
//! oneshot replies; scheduler tasks report progress through
//! [`JobUpdate`](crate::scheduler::JobUpdate) messages. All status events are
//! published from here, which gives every job a strictly ordered event
//! stream: `accepted`, `started`, progress envelopes, then exactly one
//! terminal event.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::error::ControlError;
use crate::events::{JobMessage, StatusBus, StatusEvent};
use crate::job::{AbortReason, Cookie, Job, JobId, JobState, Stats};
use crate::output::OutputPlacer;
use crate::policy::RecursionPolicy;
use crate::scheduler::{run_job, JobUpdate, SchedulerConfig};
use crate::worker::{CollaboratorScript, FetchSettings, PageFetcher};

/// Manager-wide settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Final artifacts land here.
    pub destdir: PathBuf,
    /// Staging files are created here.
    pub tempdir: PathBuf,
    /// Worker concurrency when the archive command names none.
    pub default_concurrency: usize,
    /// Upper bound on per-job worker concurrency.
    pub max_concurrency: usize,
    /// Whole-job deadline.
    pub job_deadline: Duration,
    /// Cooperative-cancel grace period.
    pub grace: Duration,
    /// How long terminal jobs stay queryable before they are swept.
    pub retention: Duration,
    /// Network-idle wait before a page snapshot.
    pub idle_timeout: Duration,
    /// Hard per-page deadline.
    pub page_timeout: Duration,
    /// Collaborator scripts enabled for every job.
    pub scripts: Vec<CollaboratorScript>,
}

/// A fully validated archive request; invalid commands are rejected by the
/// control adapter before one of these exists.
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    /// Canonical root URL.
    pub url: String,
    /// Operator identity the command arrived under.
    pub owner: String,
    /// Requested concurrency; clamped to the manager's bounds.
    pub concurrency: Option<usize>,
    pub policy: RecursionPolicy,
    pub insecure: bool,
    pub cookies: Vec<Cookie>,
    /// Output template override; defaults to a per-page template carrying
    /// the job id.
    pub output: Option<String>,
}

/// Control-plane requests handled by the manager task.
#[derive(Debug)]
pub enum Command {
    /// Create and start a new job.
    Archive {
        request: ArchiveRequest,
        reply: oneshot::Sender<Result<JobId, ControlError>>,
    },
    /// One-line status of a job.
    Status {
        id: JobId,
        reply: oneshot::Sender<Result<String, ControlError>>,
    },
    /// Cancel a job. Idempotent: revoking a terminal job succeeds without
    /// touching it.
    Revoke {
        id: JobId,
        reply: oneshot::Sender<Result<JobId, ControlError>>,
    },
}

struct JobEntry {
    job: Job,
    revoke: watch::Sender<bool>,
    placer: OutputPlacer,
    seqnum: u64,
    /// Set once terminal; the entry is swept past this instant.
    expires: Option<Instant>,
}

/// The manager task. Constructed with [`JobManager::new`], driven by
/// [`JobManager::run`].
pub struct JobManager {
    config: ManagerConfig,
    bus: StatusBus,
    fetcher: Arc<dyn PageFetcher>,
    jobs: HashMap<JobId, JobEntry>,
    commands: mpsc::Receiver<Command>,
    updates_tx: mpsc::Sender<(JobId, JobUpdate)>,
    updates_rx: mpsc::Receiver<(JobId, JobUpdate)>,
}

impl JobManager {
    /// Returns the manager and the command handle control adapters clone.
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        bus: StatusBus,
        fetcher: Arc<dyn PageFetcher>,
    ) -> (Self, mpsc::Sender<Command>) {
        let (command_tx, commands) = mpsc::channel(64);
        let (updates_tx, updates_rx) = mpsc::channel(256);
        (
            Self {
                config,
                bus,
                fetcher,
                jobs: HashMap::new(),
                commands,
                updates_tx,
                updates_rx,
            },
            command_tx,
        )
    }

    /// Run until every command handle is dropped, then mark the remaining
    /// non-terminal jobs aborted.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(Duration::from_secs(60));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some((id, update)) = self.updates_rx.recv() => {
                    self.handle_update(id, update).await;
                }
                _ = sweep.tick() => self.sweep(),
            }
        }
        self.shutdown();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Archive { request, reply } => {
                let _ = reply.send(self.archive(request));
            }
            Command::Status { id, reply } => {
                let result = self
                    .jobs
                    .get(&id)
                    .map(|entry| entry.job.format_status())
                    .ok_or_else(|| ControlError::UnknownJob(id.to_string()));
                let _ = reply.send(result);
            }
            Command::Revoke { id, reply } => {
                let _ = reply.send(self.revoke(id));
            }
        }
    }

    fn archive(&mut self, request: ArchiveRequest) -> Result<JobId, ControlError> {
        let id = self.fresh_id();
        let concurrency = request
            .concurrency
            .unwrap_or(self.config.default_concurrency)
            .clamp(1, self.config.max_concurrency);

        let template = request
            .output
            .unwrap_or_else(|| format!("{id}-{{host}}-{{date}}-{{seqnum}}.warc.gz"));
        let placer = OutputPlacer::new(&self.config.destdir, template)
            .map_err(|e| ControlError::Malformed(format!("output: {e}")))?;

        let job = Job {
            id: id.clone(),
            url: request.url.clone(),
            owner: request.owner.clone(),
            concurrency,
            policy: request.policy.clone(),
            insecure: request.insecure,
            cookies: request.cookies.clone(),
            state: JobState::Pending,
            queued: chrono::Utc::now(),
            started: None,
            finished: None,
            abort_reason: None,
            stats: Stats::default(),
        };

        let (revoke_tx, revoke_rx) = watch::channel(false);
        let scheduler_config = SchedulerConfig {
            concurrency,
            settings: FetchSettings {
                idle_timeout: self.config.idle_timeout,
                timeout: self.config.page_timeout,
                insecure: request.insecure,
                cookies: request.cookies,
            },
            scripts: self.config.scripts.clone(),
            staging_dir: self.config.tempdir.clone(),
            job_deadline: self.config.job_deadline,
            grace: self.config.grace,
        };
        tokio::spawn(run_job(
            id.clone(),
            request.url.clone(),
            request.policy,
            scheduler_config,
            Arc::clone(&self.fetcher),
            self.updates_tx.clone(),
            revoke_rx,
        ));

        self.jobs.insert(
            id.clone(),
            JobEntry {
                job,
                revoke: revoke_tx,
                placer,
                seqnum: 0,
                expires: None,
            },
        );
        info!("job {id} accepted: {} for {}", request.url, request.owner);
        self.bus
            .publish(StatusEvent::accepted(id.clone(), request.url, request.owner));
        Ok(id)
    }

    fn revoke(&mut self, id: JobId) -> Result<JobId, ControlError> {
        let entry = self
            .jobs
            .get(&id)
            .ok_or_else(|| ControlError::UnknownJob(id.to_string()))?;
        if entry.job.state.is_terminal() {
            debug!("job {id} already terminal, revoke is a no-op");
            return Ok(id);
        }
        info!("job {id} revoked");
        let _ = entry.revoke.send(true);
        Ok(id)
    }

    async fn handle_update(&mut self, id: JobId, update: JobUpdate) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            debug!("dropping update for swept job {id}");
            return;
        };
        match update {
            JobUpdate::Started => {
                if let Err(e) = entry.job.transition(JobState::Running) {
                    warn!("job {id}: {e}");
                    return;
                }
                self.bus.publish(StatusEvent::started(id));
            }
            JobUpdate::Progress(stats) => {
                if entry.job.state.is_terminal() {
                    return;
                }
                entry.job.stats = stats;
                self.bus.publish(StatusEvent::envelope(
                    id.clone(),
                    JobMessage::Recursing {
                        pending: stats.pending,
                        have: stats.have,
                        running: stats.running,
                    },
                ));
                self.bus
                    .publish(StatusEvent::envelope(id, JobMessage::Stats { stats }));
            }
            JobUpdate::UrlFetched(url) => {
                self.bus
                    .publish(StatusEvent::envelope(id, JobMessage::Fetch { url }));
            }
            JobUpdate::ArtifactReady { staged, host } => {
                entry.seqnum += 1;
                if let Err(e) = entry.placer.place(&staged, &host, entry.seqnum).await {
                    // the staged file is left in place rather than lost
                    warn!("job {id}: placing capture failed: {e:#}");
                }
            }
            JobUpdate::Terminal { stats, reason } => {
                entry.job.stats = stats;
                if !stats.is_terminal_consistent() {
                    warn!("job {id}: inconsistent terminal stats: {stats:?}");
                }
                let next = match reason {
                    None => JobState::Finished,
                    Some(_) => JobState::Aborted,
                };
                if entry.job.state == JobState::Pending && next == JobState::Finished {
                    // terminal report overtook the start report
                    let _ = entry.job.transition(JobState::Running);
                }
                entry.job.abort_reason = reason;
                if let Err(e) = entry.job.transition(next) {
                    warn!("job {id}: {e}");
                    return;
                }
                entry.expires = Some(Instant::now() + self.config.retention);
                let elapsed = entry
                    .job
                    .finished
                    .zip(entry.job.started)
                    .map_or(0, |(end, start)| (end - start).num_seconds().max(0) as u64);
                info!(
                    "job {id} {} after {}",
                    entry.job.state,
                    crate::utils::pretty_time_delta(elapsed)
                );
                let event = match reason {
                    None => StatusEvent::finished(id, stats),
                    Some(reason) => StatusEvent::aborted(id, reason, stats),
                };
                self.bus.publish(event);
            }
        }
    }

    /// Drop terminal entries past their retention window.
    fn sweep(&mut self) {
        let now = Instant::now();
        let before = self.jobs.len();
        self.jobs
            .retain(|_, entry| entry.expires.map_or(true, |at| at > now));
        let swept = before - self.jobs.len();
        if swept > 0 {
            debug!("swept {swept} terminal jobs");
        }
    }

    /// Mark every live job aborted on the way out.
    fn shutdown(mut self) {
        info!("manager shutting down, {} jobs in table", self.jobs.len());
        for (id, entry) in &mut self.jobs {
            if entry.job.state.is_terminal() {
                continue;
            }
            let _ = entry.revoke.send(true);
            entry.job.abort_reason = Some(AbortReason::Revoked);
            if entry.job.transition(JobState::Aborted).is_ok() {
                self.bus.publish(StatusEvent::aborted(
                    id.clone(),
                    AbortReason::Revoked,
                    entry.job.stats,
                ));
            }
        }
    }

    fn fresh_id(&self) -> JobId {
        loop {
            let id = JobId::generate();
            if !self.jobs.contains_key(&id) {
                return id;
            }
        }
    }
}
