//! Worker-facing contract.
//!
//! A worker owns one browser session and executes one page capture end to
//! end, returning a classified outcome plus the outbound links it
//! discovered. The orchestrator only ever talks to workers through
//! [`PageFetcher`]; the concrete browser driver lives in [`chromium`] and
//! tests substitute scripted implementations.

pub mod chromium;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::FetchError;
use crate::job::Cookie;
use crate::policy::UrlRecord;

pub use chromium::ChromiumFetcher;

/// Cooperative cancellation signal handed to every fetch. Flips to `true`
/// when the job is revoked; a worker should stop at its next suspension
/// point and return whatever partial artifact it has.
pub type CancelSignal = watch::Receiver<bool>;

/// Lifecycle hook at which a collaborator script is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionHook {
    /// After navigation commits, before idle detection.
    Onload,
    /// After the page went idle, before the state snapshot is captured.
    Onsnapshot,
}

/// An opaque in-page script. The orchestrator knows only its name, its hook
/// and that evaluating it yields a JSON value; everything the script does
/// inside the page is a black box. Scripts are swappable per job.
#[derive(Debug, Clone)]
pub struct CollaboratorScript {
    pub name: String,
    pub hook: InjectionHook,
    pub source: String,
}

impl CollaboratorScript {
    #[must_use]
    pub fn new(name: impl Into<String>, hook: InjectionHook, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hook,
            source: source.into(),
        }
    }

    /// The stock link-extraction collaborator: returns the page's anchor
    /// targets as an ordered array of absolute URL strings.
    #[must_use]
    pub fn extract_links() -> Self {
        Self::new(
            "extract-links",
            InjectionHook::Onsnapshot,
            "(function () { return Array.from(document.links).map(a => a.href); })()",
        )
    }
}

/// Per-fetch tunables, derived from job parameters and orchestrator
/// defaults.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// How long the page must be network-idle before snapshotting.
    pub idle_timeout: Duration,
    /// Hard per-page deadline; the worker self-terminates past it.
    pub timeout: Duration,
    /// Ignore certificate errors for this job.
    pub insecure: bool,
    /// Opaque cookie overrides appended to the session jar.
    pub cookies: Vec<Cookie>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
            insecure: false,
            cookies: Vec::new(),
        }
    }
}

/// Everything a worker needs for one page capture.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: UrlRecord,
    pub settings: FetchSettings,
    /// Staging file the capture artifact is written to; the scheduler moves
    /// it (or cleans it up) after completion.
    pub staging: PathBuf,
    pub scripts: Vec<CollaboratorScript>,
}

/// Transfer-level counters reported by a worker for one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub requests: u64,
    pub bytes_rcv: u64,
}

/// Result of one page capture.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Capture succeeded; `links` preserves in-page discovery order.
    Fetched {
        links: Vec<String>,
        stats: PageStats,
    },
    /// Capture failed with a classified error. A partial artifact may still
    /// exist at the staging path and is preserved, not discarded.
    Failed(FetchError),
}

/// A worker factory-and-driver: checks out one exclusively owned browser
/// session per call, never shared across concurrent fetches.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest, cancel: CancelSignal) -> FetchOutcome;
}
