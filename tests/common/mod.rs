//! Shared test fixtures: a scripted in-memory page fetcher and a manager
//! harness.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sitevault::error::FetchError;
use sitevault::events::StatusBus;
use sitevault::job::{Command, JobManager, ManagerConfig};
use sitevault::worker::{CancelSignal, FetchOutcome, FetchRequest, PageFetcher, PageStats};

/// Serves a canned site map instead of a browser. Tracks the maximum number
/// of concurrently running fetches so tests can assert the scheduler's
/// admission ceiling.
pub struct ScriptedFetcher {
    site: HashMap<String, Vec<String>>,
    failures: HashMap<String, FetchError>,
    delay: Duration,
    concurrent: AtomicUsize,
    max_concurrent: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new(site: HashMap<String, Vec<String>>) -> Self {
        Self {
            site,
            failures: HashMap::new(),
            delay: Duration::from_millis(1),
            concurrent: AtomicUsize::new(0),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_failure(mut self, url: &str, error: FetchError) -> Self {
        self.failures.insert(url.to_string(), error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handle on the high-water mark of concurrent fetches.
    pub fn concurrency_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_concurrent)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest, mut cancel: CancelSignal) -> FetchOutcome {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        let outcome = tokio::select! {
            () = tokio::time::sleep(self.delay) => {
                if let Some(error) = self.failures.get(&request.url.url) {
                    FetchOutcome::Failed(error.clone())
                } else {
                    let body = format!("<html>{}</html>", request.url.url);
                    tokio::fs::write(&request.staging, &body).await.unwrap();
                    FetchOutcome::Fetched {
                        links: self.site.get(&request.url.url).cloned().unwrap_or_default(),
                        stats: PageStats {
                            requests: 1,
                            bytes_rcv: body.len() as u64,
                        },
                    }
                }
            }
            _ = cancel.changed() => FetchOutcome::Failed(FetchError::Crash("cancelled".to_string())),
        };

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Build a flat site map: root plus `children` pages linked from it.
pub fn fanout_site(root: &str, children: usize) -> HashMap<String, Vec<String>> {
    let links = (0..children).map(|i| format!("{root}page-{i}")).collect();
    HashMap::from([(root.to_string(), links)])
}

/// A running manager plus everything a test needs to drive it.
pub struct Harness {
    pub commands: mpsc::Sender<Command>,
    pub bus: StatusBus,
    pub destdir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

pub fn manager_config(dir: &std::path::Path) -> ManagerConfig {
    ManagerConfig {
        destdir: dir.join("out"),
        tempdir: dir.to_path_buf(),
        default_concurrency: 1,
        max_concurrency: 8,
        job_deadline: Duration::from_secs(10),
        grace: Duration::from_millis(200),
        retention: Duration::from_secs(60),
        idle_timeout: Duration::from_millis(1),
        page_timeout: Duration::from_secs(5),
        scripts: Vec::new(),
    }
}

/// Spawn a manager over `fetcher`, with `tweak` applied to the default
/// test configuration.
pub fn spawn_manager(
    fetcher: Arc<dyn PageFetcher>,
    tweak: impl FnOnce(&mut ManagerConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = manager_config(dir.path());
    tweak(&mut config);
    std::fs::create_dir_all(&config.destdir).unwrap();
    let destdir = config.destdir.clone();

    let bus = StatusBus::new(256);
    let (manager, commands) = JobManager::new(config, bus.clone(), fetcher);
    tokio::spawn(manager.run());
    Harness {
        commands,
        bus,
        destdir,
        _dir: dir,
    }
}
