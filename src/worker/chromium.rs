//! Chromium-backed page fetcher.
//!
//! Each fetch checks out a dedicated browser session: its own Chromium
//! process, profile directory and CDP handler task, torn down when the fetch
//! ends. Sessions are never shared between concurrent fetches; the
//! configured job concurrency is therefore also the ceiling on live browser
//! processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::FetchError;

use super::{
    CancelSignal, CollaboratorScript, FetchOutcome, FetchRequest, InjectionHook, PageFetcher,
    PageStats,
};

/// Drives one-page captures through Chromium over CDP.
#[derive(Debug, Clone)]
pub struct ChromiumFetcher {
    headless: bool,
}

impl ChromiumFetcher {
    #[must_use]
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }

    async fn capture(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let deadline = tokio::time::Instant::now() + request.settings.timeout;
        let session = Session::launch(self.headless, request.settings.insecure).await?;

        let page = bounded(deadline, session.browser.new_page("about:blank"))
            .await?
            .map_err(|e| FetchError::Crash(format!("new page: {e}")))?;

        if !request.settings.cookies.is_empty() {
            set_cookies(&page, request).await?;
        }

        bounded(deadline, page.goto(request.url.url.as_str()))
            .await?
            .map_err(|e| FetchError::Navigation(format!("goto: {e}")))?;
        bounded(deadline, page.wait_for_navigation())
            .await?
            .map_err(|e| FetchError::Navigation(format!("load: {e}")))?;

        let mut links = Vec::new();
        run_scripts(&page, &request.scripts, InjectionHook::Onload, &mut links).await;

        // let the page settle before snapshotting
        let idle = request.settings.idle_timeout.min(remaining(deadline));
        tokio::time::sleep(idle).await;

        run_scripts(&page, &request.scripts, InjectionHook::Onsnapshot, &mut links).await;

        let content = bounded(deadline, page.content())
            .await?
            .map_err(|e| FetchError::Crash(format!("snapshot: {e}")))?;
        let bytes = content.len() as u64;
        tokio::fs::write(&request.staging, content)
            .await
            .map_err(|e| FetchError::Crash(format!("staging write: {e}")))?;

        debug!(url = %request.url.url, bytes, links = links.len(), "page captured");
        Ok(FetchOutcome::Fetched {
            links,
            stats: PageStats {
                requests: 1,
                bytes_rcv: bytes,
            },
        })
    }
}

#[async_trait]
impl PageFetcher for ChromiumFetcher {
    async fn fetch(&self, request: FetchRequest, mut cancel: CancelSignal) -> FetchOutcome {
        tokio::select! {
            outcome = self.capture(&request) => match outcome {
                Ok(outcome) => outcome,
                Err(e) => FetchOutcome::Failed(e),
            },
            () = cancelled(&mut cancel) => {
                debug!(url = %request.url.url, "fetch cancelled");
                FetchOutcome::Failed(FetchError::Crash("cancelled".to_string()))
            }
        }
    }
}

/// Resolve once the cancel signal flips to `true`; pends forever if the
/// sender goes away first.
async fn cancelled(cancel: &mut CancelSignal) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn remaining(deadline: tokio::time::Instant) -> Duration {
    deadline.saturating_duration_since(tokio::time::Instant::now())
}

/// Run `fut` against the page deadline; elapsing it is a navigation-class
/// failure (the cooperative per-page timeout).
async fn bounded<F, T>(deadline: tokio::time::Instant, fut: F) -> Result<T, FetchError>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| FetchError::Navigation("page deadline elapsed".to_string()))
}

async fn set_cookies(page: &Page, request: &FetchRequest) -> Result<(), FetchError> {
    let mut params = Vec::with_capacity(request.settings.cookies.len());
    for cookie in &request.settings.cookies {
        let param = CookieParam::builder()
            .name(cookie.name.clone())
            .value(cookie.value.clone())
            .url(request.url.url.clone())
            .build()
            .map_err(FetchError::Protocol)?;
        params.push(param);
    }
    page.execute(SetCookiesParams::new(params))
        .await
        .map_err(|e| FetchError::Crash(format!("set cookies: {e}")))?;
    Ok(())
}

/// Evaluate every collaborator script registered for `hook`.
///
/// Scripts are black boxes; a script that throws or returns something
/// unexpected is logged and treated as an empty result, it never fails the
/// fetch. Any script returning an array of strings contributes those to the
/// discovered-link list in order.
async fn run_scripts(
    page: &Page,
    scripts: &[CollaboratorScript],
    hook: InjectionHook,
    links: &mut Vec<String>,
) {
    for script in scripts.iter().filter(|s| s.hook == hook) {
        let value = match page.evaluate(script.source.as_str()).await {
            Ok(result) => match result.into_value::<serde_json::Value>() {
                Ok(v) => v,
                Err(e) => {
                    warn!(script = %script.name, "collaborator returned malformed data: {e}");
                    continue;
                }
            },
            Err(e) => {
                warn!(script = %script.name, "collaborator script failed: {e}");
                continue;
            }
        };
        if let Some(items) = value.as_array() {
            let before = links.len();
            links.extend(items.iter().filter_map(|v| v.as_str().map(String::from)));
            trace!(
                script = %script.name,
                extracted = links.len() - before,
                "collaborator returned links"
            );
        }
    }
}

/// An exclusively owned Chromium session.
struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    profile_dir: Option<PathBuf>,
}

impl Session {
    /// Launch a fresh Chromium with its own profile directory. Failure to
    /// allocate the session is resource exhaustion, not a page failure.
    async fn launch(headless: bool, insecure: bool) -> Result<Self, FetchError> {
        let executable = find_executable()
            .ok_or_else(|| FetchError::Resources("no chromium executable found".to_string()))?;

        let profile_dir = tempfile::Builder::new()
            .prefix("sitevault-profile-")
            .tempdir()
            .map_err(|e| FetchError::Resources(format!("profile dir: {e}")))?
            .keep();

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_secs(30))
            .window_size(1920, 1080)
            .user_data_dir(&profile_dir)
            .chrome_executable(executable)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--mute-audio");
        if headless {
            builder = builder.headless_mode(HeadlessMode::default());
        } else {
            builder = builder.with_head();
        }
        if insecure {
            builder = builder.arg("--ignore-certificate-errors");
        }
        let config = builder
            .build()
            .map_err(|e| FetchError::Resources(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Resources(format!("browser launch: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(result) = handler.next().await {
                if let Err(e) = result {
                    trace!("cdp handler: {e}");
                }
            }
        });

        Ok(Self {
            browser,
            handler: handler_task,
            profile_dir: Some(profile_dir),
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!("failed to remove profile dir {}: {e}", dir.display());
            }
        }
    }
}

/// Locate a Chromium executable: `CHROMIUM_PATH` overrides, then well-known
/// install locations, then `which`.
fn find_executable() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!("CHROMIUM_PATH points to a non-existent file");
    }

    let candidates = [
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/snap/bin/chromium",
        "/opt/google/chrome/chrome",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];
    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(output) = Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }
    None
}
