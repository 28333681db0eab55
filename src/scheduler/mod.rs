//! Concurrency-bounded FIFO scheduler.
//!
//! One scheduler task runs per job and is the sole mutator of that job's
//! queue, visited set and statistics; workers only ever receive owned
//! requests and return owned outcomes through a [`JoinSet`], so no job-local
//! state is shared or locked. Progress flows to the job manager as
//! [`JobUpdate`] messages.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tokio::time::Instant;
use url::Url;

use crate::error::FetchError;
use crate::job::{AbortReason, JobId, Stats};
use crate::policy::{RecursionEngine, RecursionPolicy, UrlRecord};
use crate::worker::{
    CollaboratorScript, FetchOutcome, FetchRequest, FetchSettings, PageFetcher,
};

/// Per-job scheduling parameters, fixed at job start.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrently running workers. Never zero.
    pub concurrency: usize,
    pub settings: FetchSettings,
    pub scripts: Vec<CollaboratorScript>,
    /// Directory staging files are created in.
    pub staging_dir: PathBuf,
    /// Whole-job deadline; elapsing it stops admission and drains the queue.
    pub job_deadline: Duration,
    /// How long in-flight workers get to stop cooperatively after a revoke,
    /// deadline or resource failure before they are aborted outright.
    pub grace: Duration,
}

/// Progress report from a scheduler task to the job manager.
#[derive(Debug)]
pub enum JobUpdate {
    /// The first fetch is about to be dispatched.
    Started,
    /// Counter snapshot after a worker completed.
    Progress(Stats),
    /// One page was captured successfully.
    UrlFetched(String),
    /// A staged artifact (possibly partial) is ready to be placed.
    ArtifactReady { staged: PathBuf, host: String },
    /// The job is done; no further updates follow. `reason` is `None` for a
    /// normal finish (including deadline expiry) and set for aborts.
    Terminal {
        stats: Stats,
        reason: Option<AbortReason>,
    },
}

/// Run one job to completion. Consumes the root URL, drives workers through
/// `fetcher` and reports progress on `updates`; flipping `revoke` to `true`
/// cancels the job.
pub async fn run_job(
    id: JobId,
    root: String,
    policy: RecursionPolicy,
    config: SchedulerConfig,
    fetcher: Arc<dyn PageFetcher>,
    updates: mpsc::Sender<(JobId, JobUpdate)>,
    revoke: watch::Receiver<bool>,
) {
    let engine = RecursionEngine::new(id.clone(), policy);
    let mut scheduler = JobScheduler {
        id,
        engine,
        queue: VecDeque::new(),
        stats: Stats::default(),
        config,
        fetcher,
        updates,
    };
    scheduler.run(root, revoke).await;
}

struct JobScheduler {
    id: JobId,
    engine: RecursionEngine,
    queue: VecDeque<UrlRecord>,
    stats: Stats,
    config: SchedulerConfig,
    fetcher: Arc<dyn PageFetcher>,
    updates: mpsc::Sender<(JobId, JobUpdate)>,
}

impl JobScheduler {
    async fn run(&mut self, root: String, mut revoke: watch::Receiver<bool>) {
        match self.engine.admit_root(&root) {
            Ok(record) => {
                self.queue.push_back(record);
                self.stats.pending = 1;
            }
            Err(e) => {
                // validated upstream, but a root that slips through is
                // dequeued-and-ignored so the accounting identity holds
                warn!("job {}: root rejected: {e}", self.id);
                self.stats.have = 1;
                self.stats.ignored = 1;
                self.send(JobUpdate::Terminal {
                    stats: self.stats,
                    reason: None,
                })
                .await;
                return;
            }
        }

        self.send(JobUpdate::Started).await;

        let mut workers: JoinSet<FetchOutcome> = JoinSet::new();
        let mut inflight: HashMap<TaskId, (UrlRecord, PathBuf)> = HashMap::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let deadline = Instant::now() + self.config.job_deadline;
        let mut hard_stop: Option<Instant> = None;
        let mut draining = false;
        let mut reason: Option<AbortReason> = None;

        loop {
            if !draining {
                if let Err(e) = self.dispatch(&mut workers, &mut inflight, &cancel_rx) {
                    warn!("job {}: staging failed: {e}", self.id);
                    reason = Some(AbortReason::Resources);
                    self.begin_drain(&cancel_tx, &mut draining, &mut hard_stop);
                }
            }

            if workers.is_empty() && (draining || self.queue.is_empty()) {
                break;
            }

            tokio::select! {
                Some(result) = workers.join_next_with_id(), if !workers.is_empty() => {
                    let resources = self.reap(result, &mut inflight).await;
                    if resources && !draining {
                        reason = Some(AbortReason::Resources);
                        self.begin_drain(&cancel_tx, &mut draining, &mut hard_stop);
                    }
                    self.send(JobUpdate::Progress(self.stats)).await;
                }
                () = revoked(&mut revoke), if !draining => {
                    debug!("job {}: revoked", self.id);
                    reason = Some(AbortReason::Revoked);
                    self.begin_drain(&cancel_tx, &mut draining, &mut hard_stop);
                }
                () = tokio::time::sleep_until(deadline), if !draining => {
                    debug!("job {}: deadline reached, draining queue", self.id);
                    self.begin_drain(&cancel_tx, &mut draining, &mut hard_stop);
                }
                () = at(hard_stop) => {
                    debug!("job {}: grace elapsed, aborting {} workers", self.id, workers.len());
                    workers.abort_all();
                    hard_stop = None;
                }
            }
        }

        debug!(
            "job {}: terminal, {} fetched / {} failed / {} crashed / {} ignored",
            self.id, self.stats.finished, self.stats.failed, self.stats.crashed,
            self.stats.ignored
        );
        self.send(JobUpdate::Terminal {
            stats: self.stats,
            reason,
        })
        .await;
    }

    /// Fill free worker slots from the front of the queue.
    fn dispatch(
        &mut self,
        workers: &mut JoinSet<FetchOutcome>,
        inflight: &mut HashMap<TaskId, (UrlRecord, PathBuf)>,
        cancel: &watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        while workers.len() < self.config.concurrency && !self.queue.is_empty() {
            // stage before dequeueing so a failure leaves the queue intact
            // for the drain accounting
            let staged = self.stage_file()?;
            let Some(record) = self.queue.pop_front() else {
                break;
            };
            self.stats.pending -= 1;
            self.stats.running += 1;
            self.stats.have += 1;

            trace!("job {}: dispatch {} (depth {})", self.id, record.url, record.depth);
            let request = FetchRequest {
                url: record.clone(),
                settings: self.config.settings.clone(),
                staging: staged.clone(),
                scripts: self.config.scripts.clone(),
            };
            let fetcher = Arc::clone(&self.fetcher);
            let cancel = cancel.clone();
            let handle = workers.spawn(async move { fetcher.fetch(request, cancel).await });
            inflight.insert(handle.id(), (record, staged));
        }
        Ok(())
    }

    fn stage_file(&self) -> std::io::Result<PathBuf> {
        let (_, path) = tempfile::Builder::new()
            .prefix("sitevault-page-")
            .suffix(".tmp")
            .tempfile_in(&self.config.staging_dir)?
            .keep()
            .map_err(|e| e.error)?;
        Ok(path)
    }

    /// Fold one worker result into the statistics; returns `true` when the
    /// failure was resource exhaustion and the whole job must abort.
    async fn reap(
        &mut self,
        result: Result<(TaskId, FetchOutcome), JoinError>,
        inflight: &mut HashMap<TaskId, (UrlRecord, PathBuf)>,
    ) -> bool {
        let (task_id, outcome) = match result {
            Ok((task_id, outcome)) => (task_id, Some(outcome)),
            Err(join_error) => (join_error.id(), None),
        };
        let Some((record, staged)) = inflight.remove(&task_id) else {
            warn!("job {}: result from unknown worker task", self.id);
            return false;
        };
        self.stats.running -= 1;

        let mut resources = false;
        match outcome {
            Some(FetchOutcome::Fetched { links, stats }) => {
                self.stats.finished += 1;
                self.stats.requests += stats.requests;
                self.stats.bytes_rcv += stats.bytes_rcv;

                let decision = self.engine.decide(record.depth, &links);
                // malformed links are accounted as dequeued-and-ignored
                self.stats.ignored += decision.ignored;
                self.stats.have += decision.ignored;
                self.stats.pending += decision.accepted.len() as u64;
                self.queue.extend(decision.accepted);

                self.send(JobUpdate::UrlFetched(record.url.clone())).await;
            }
            Some(FetchOutcome::Failed(error)) => {
                debug!("job {}: {} failed: {error}", self.id, record.url);
                match error {
                    FetchError::Navigation(_) | FetchError::Protocol(_) => {
                        self.stats.failed += 1;
                    }
                    FetchError::Crash(_) => self.stats.crashed += 1,
                    FetchError::Resources(_) => {
                        self.stats.ignored += 1;
                        resources = true;
                    }
                }
            }
            // force-aborted after the grace period
            None => self.stats.crashed += 1,
        }

        if artifact_present(&staged).await {
            self.send(JobUpdate::ArtifactReady {
                staged,
                host: host_of(&record.url),
            })
            .await;
        } else {
            let _ = tokio::fs::remove_file(&staged).await;
        }
        resources
    }

    /// Stop admission, account the remaining queue as ignored and give
    /// in-flight workers the grace period to stop cooperatively.
    fn begin_drain(
        &mut self,
        cancel: &watch::Sender<bool>,
        draining: &mut bool,
        hard_stop: &mut Option<Instant>,
    ) {
        let drained = self.queue.len() as u64;
        self.stats.ignored += drained;
        self.stats.have += drained;
        self.stats.pending = 0;
        self.queue.clear();

        let _ = cancel.send(true);
        *draining = true;
        *hard_stop = Some(Instant::now() + self.config.grace);
    }

    async fn send(&self, update: JobUpdate) {
        // a closed manager means shutdown; nothing left to report to
        let _ = self.updates.send((self.id.clone(), update)).await;
    }
}

/// Resolve once `revoke` flips to `true`; pends forever if the sender went
/// away (the job then just runs to completion).
async fn revoked(revoke: &mut watch::Receiver<bool>) {
    loop {
        if *revoke.borrow() {
            return;
        }
        if revoke.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn at(instant: Option<Instant>) {
    match instant {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

async fn artifact_present(path: &PathBuf) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Maps URLs to canned outcomes; writes a fixed artifact per success.
    struct CannedFetcher {
        links: HashMap<String, Vec<String>>,
        failures: HashMap<String, FetchError>,
        delay: Duration,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn fetch(&self, request: FetchRequest, _cancel: crate::worker::CancelSignal) -> FetchOutcome {
            tokio::time::sleep(self.delay).await;
            if let Some(error) = self.failures.get(&request.url.url) {
                return FetchOutcome::Failed(error.clone());
            }
            tokio::fs::write(&request.staging, b"<html></html>")
                .await
                .unwrap();
            let links = self.links.get(&request.url.url).cloned().unwrap_or_default();
            FetchOutcome::Fetched {
                links,
                stats: crate::worker::PageStats {
                    requests: 1,
                    bytes_rcv: 13,
                },
            }
        }
    }

    fn config(staging: &std::path::Path) -> SchedulerConfig {
        SchedulerConfig {
            concurrency: 2,
            settings: FetchSettings::default(),
            scripts: Vec::new(),
            staging_dir: staging.to_path_buf(),
            job_deadline: Duration::from_secs(30),
            grace: Duration::from_secs(1),
        }
    }

    async fn drive(
        fetcher: CannedFetcher,
        config: SchedulerConfig,
        policy: RecursionPolicy,
        revoke: watch::Receiver<bool>,
    ) -> (Stats, Option<AbortReason>, Vec<JobUpdate>) {
        let (tx, mut rx) = mpsc::channel(64);
        let id = JobId::from("lusab-babad-lusab-babad");
        tokio::spawn(run_job(
            id,
            "https://example.com/".to_string(),
            policy,
            config,
            Arc::new(fetcher),
            tx,
            revoke,
        ));
        let mut updates = Vec::new();
        while let Some((_, update)) = rx.recv().await {
            updates.push(update);
        }
        let (stats, reason) = match updates.last() {
            Some(JobUpdate::Terminal { stats, reason }) => (*stats, *reason),
            other => panic!("missing terminal update, got {other:?}"),
        };
        (stats, reason, updates)
    }

    #[tokio::test]
    async fn depth_one_crawl_conserves_counts() {
        let dir = tempfile::tempdir().unwrap();
        let links = HashMap::from([(
            "https://example.com/".to_string(),
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
                "mailto:nope@example.com".to_string(),
            ],
        )]);
        let fetcher = CannedFetcher {
            links,
            failures: HashMap::new(),
            delay: Duration::from_millis(1),
        };
        let (_, revoke) = watch::channel(false);
        let (stats, reason, updates) =
            drive(fetcher, config(dir.path()), RecursionPolicy::DepthLimit(1), revoke).await;

        assert!(reason.is_none());
        assert_eq!(stats.finished, 3);
        assert_eq!(stats.ignored, 1); // the mailto link
        assert_eq!(stats.have, 4);
        assert!(stats.is_terminal_consistent());
        assert!(updates.iter().any(|u| matches!(u, JobUpdate::Started)));

        let fetched: Vec<&str> = updates
            .iter()
            .filter_map(|u| match u {
                JobUpdate::UrlFetched(url) => Some(url.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched[0], "https://example.com/");
    }

    #[tokio::test]
    async fn failures_land_in_their_own_counters() {
        let dir = tempfile::tempdir().unwrap();
        let links = HashMap::from([(
            "https://example.com/".to_string(),
            vec![
                "https://example.com/broken".to_string(),
                "https://example.com/crashy".to_string(),
            ],
        )]);
        let failures = HashMap::from([
            (
                "https://example.com/broken".to_string(),
                FetchError::Navigation("503".to_string()),
            ),
            (
                "https://example.com/crashy".to_string(),
                FetchError::Crash("tab gone".to_string()),
            ),
        ]);
        let fetcher = CannedFetcher {
            links,
            failures,
            delay: Duration::from_millis(1),
        };
        let (_, revoke) = watch::channel(false);
        let (stats, reason, _) =
            drive(fetcher, config(dir.path()), RecursionPolicy::DepthLimit(1), revoke).await;

        assert!(reason.is_none());
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.crashed, 1);
        assert!(stats.is_terminal_consistent());
    }

    #[tokio::test]
    async fn resource_exhaustion_aborts_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let failures = HashMap::from([(
            "https://example.com/".to_string(),
            FetchError::Resources("no browser".to_string()),
        )]);
        let fetcher = CannedFetcher {
            links: HashMap::new(),
            failures,
            delay: Duration::from_millis(1),
        };
        let (_, revoke) = watch::channel(false);
        let (stats, reason, _) =
            drive(fetcher, config(dir.path()), RecursionPolicy::DepthLimit(1), revoke).await;

        assert_eq!(reason, Some(AbortReason::Resources));
        assert_eq!(stats.ignored, 1);
        assert!(stats.is_terminal_consistent());
    }

    #[tokio::test]
    async fn revoke_drains_the_queue_as_ignored() {
        let dir = tempfile::tempdir().unwrap();
        // root fans out to many slow children
        let children: Vec<String> = (0..10)
            .map(|i| format!("https://example.com/{i}"))
            .collect();
        let links = HashMap::from([("https://example.com/".to_string(), children)]);
        let fetcher = CannedFetcher {
            links,
            failures: HashMap::new(),
            delay: Duration::from_millis(20),
        };
        let mut cfg = config(dir.path());
        cfg.concurrency = 1;
        let (revoke_tx, revoke_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = revoke_tx.send(true);
        });
        let (stats, reason, _) =
            drive(fetcher, cfg, RecursionPolicy::DepthLimit(1), revoke_rx).await;

        assert_eq!(reason, Some(AbortReason::Revoked));
        assert!(stats.ignored > 0);
        assert!(stats.is_terminal_consistent());
    }
}
