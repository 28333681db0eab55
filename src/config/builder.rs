//! Typestate builder for [`OrchestratorConfig`].
//!
//! The destination directory is required; the type parameter makes `build`
//! unavailable until it has been set, so a missing directory is a compile
//! error rather than a runtime one.

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::worker::CollaboratorScript;

use super::types::OrchestratorConfig;

/// Builder state: destination directory present.
pub struct WithDestDir;

pub struct OrchestratorConfigBuilder<State = ()> {
    control_addr: SocketAddr,
    feed_addr: SocketAddr,
    destdir: Option<PathBuf>,
    tempdir: Option<PathBuf>,
    default_concurrency: usize,
    max_concurrency: usize,
    job_deadline: Duration,
    grace: Duration,
    retention: Duration,
    idle_timeout: Duration,
    page_timeout: Duration,
    bus_capacity: usize,
    headless: bool,
    scripts: Vec<CollaboratorScript>,
    _state: PhantomData<State>,
}

impl Default for OrchestratorConfigBuilder<()> {
    fn default() -> Self {
        Self {
            control_addr: default_addr(4040),
            feed_addr: default_addr(4041),
            destdir: None,
            tempdir: None,
            default_concurrency: 1,
            max_concurrency: 16,
            job_deadline: Duration::from_secs(3600),
            grace: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(2),
            page_timeout: Duration::from_secs(60),
            bus_capacity: 256,
            headless: true,
            scripts: vec![CollaboratorScript::extract_links()],
            _state: PhantomData,
        }
    }
}

fn default_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

impl OrchestratorConfigBuilder<()> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the required destination directory, unlocking `build`.
    #[must_use]
    pub fn destdir(self, destdir: impl Into<PathBuf>) -> OrchestratorConfigBuilder<WithDestDir> {
        OrchestratorConfigBuilder {
            control_addr: self.control_addr,
            feed_addr: self.feed_addr,
            destdir: Some(destdir.into()),
            tempdir: self.tempdir,
            default_concurrency: self.default_concurrency,
            max_concurrency: self.max_concurrency,
            job_deadline: self.job_deadline,
            grace: self.grace,
            retention: self.retention,
            idle_timeout: self.idle_timeout,
            page_timeout: self.page_timeout,
            bus_capacity: self.bus_capacity,
            headless: self.headless,
            scripts: self.scripts,
            _state: PhantomData,
        }
    }
}

impl<State> OrchestratorConfigBuilder<State> {
    #[must_use]
    pub fn control_addr(mut self, addr: SocketAddr) -> Self {
        self.control_addr = addr;
        self
    }

    #[must_use]
    pub fn feed_addr(mut self, addr: SocketAddr) -> Self {
        self.feed_addr = addr;
        self
    }

    #[must_use]
    pub fn tempdir(mut self, tempdir: impl Into<PathBuf>) -> Self {
        self.tempdir = Some(tempdir.into());
        self
    }

    #[must_use]
    pub fn default_concurrency(mut self, n: usize) -> Self {
        self.default_concurrency = n.max(1);
        self
    }

    #[must_use]
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    #[must_use]
    pub fn job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }

    #[must_use]
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[must_use]
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    #[must_use]
    pub fn bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn scripts(mut self, scripts: Vec<CollaboratorScript>) -> Self {
        self.scripts = scripts;
        self
    }
}

impl OrchestratorConfigBuilder<WithDestDir> {
    /// Validate and assemble the configuration, creating the destination
    /// directory if needed.
    pub fn build(self) -> Result<OrchestratorConfig> {
        let destdir = self
            .destdir
            .context("destination directory missing")?;
        std::fs::create_dir_all(&destdir)
            .with_context(|| format!("creating destination {}", destdir.display()))?;
        let tempdir = self.tempdir.unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&tempdir)
            .with_context(|| format!("creating staging dir {}", tempdir.display()))?;

        Ok(OrchestratorConfig {
            control_addr: self.control_addr,
            feed_addr: self.feed_addr,
            destdir,
            tempdir,
            default_concurrency: self.default_concurrency.min(self.max_concurrency),
            max_concurrency: self.max_concurrency,
            job_deadline: self.job_deadline,
            grace: self.grace,
            retention: self.retention,
            idle_timeout: self.idle_timeout,
            page_timeout: self.page_timeout,
            bus_capacity: self.bus_capacity,
            headless: self.headless,
            scripts: self.scripts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfigBuilder::new()
            .destdir(dir.path().join("out"))
            .build()
            .unwrap();
        assert!(config.destdir.is_dir());
        assert_eq!(config.default_concurrency, 1);
        assert!(config.headless);
        assert_eq!(config.scripts.len(), 1);
    }

    #[test]
    fn default_concurrency_is_capped_by_max() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfigBuilder::new()
            .default_concurrency(8)
            .max_concurrency(4)
            .destdir(dir.path().join("out"))
            .build()
            .unwrap();
        assert_eq!(config.default_concurrency, 4);
    }
}
