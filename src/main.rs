//! Orchestrator daemon.
//!
//! Binds the control channel and the status feed, starts the job manager
//! with a Chromium-backed fetcher and runs until interrupted. Configuration
//! comes from `SITEVAULT_*` environment variables; unset variables fall back
//! to builder defaults.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use tokio::net::TcpListener;

use sitevault::control::serve_control;
use sitevault::events::serve_feed;
use sitevault::{ChromiumFetcher, JobManager, OrchestratorConfig, OrchestratorConfigBuilder, StatusBus};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let config = config_from_env()?;
    info!(
        "archiving into {}, control on {}, feed on {}",
        config.destdir.display(),
        config.control_addr,
        config.feed_addr
    );

    let bus = StatusBus::new(config.bus_capacity);
    let fetcher = Arc::new(ChromiumFetcher::new(config.headless));
    let (manager, commands) = JobManager::new(config.manager_config(), bus.clone(), fetcher);
    let manager_task = tokio::spawn(manager.run());

    let control_listener = TcpListener::bind(config.control_addr)
        .await
        .with_context(|| format!("binding control channel {}", config.control_addr))?;
    let feed_listener = TcpListener::bind(config.feed_addr)
        .await
        .with_context(|| format!("binding status feed {}", config.feed_addr))?;
    let control = tokio::spawn(serve_control(control_listener, commands));
    let feed = tokio::spawn(serve_feed(feed_listener, bus));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    info!("interrupt received, shutting down");

    // dropping the control server releases the last command handle, which
    // lets the manager mark live jobs aborted and wind down
    control.abort();
    feed.abort();
    let _ = manager_task.await;
    Ok(())
}

fn config_from_env() -> Result<OrchestratorConfig> {
    let mut builder = OrchestratorConfigBuilder::new();
    if let Some(addr) = env_parse("SITEVAULT_CONTROL_ADDR")? {
        builder = builder.control_addr(addr);
    }
    if let Some(addr) = env_parse("SITEVAULT_FEED_ADDR")? {
        builder = builder.feed_addr(addr);
    }
    if let Some(tempdir) = std::env::var_os("SITEVAULT_TEMPDIR") {
        builder = builder.tempdir(tempdir);
    }
    if let Some(n) = env_parse("SITEVAULT_CONCURRENCY")? {
        builder = builder.default_concurrency(n);
    }
    if let Some(n) = env_parse("SITEVAULT_MAX_CONCURRENCY")? {
        builder = builder.max_concurrency(n);
    }
    if let Some(secs) = env_parse("SITEVAULT_JOB_TIMEOUT_SECS")? {
        builder = builder.job_deadline(Duration::from_secs(secs));
    }
    if let Some(secs) = env_parse("SITEVAULT_GRACE_SECS")? {
        builder = builder.grace(Duration::from_secs(secs));
    }
    if let Some(secs) = env_parse("SITEVAULT_RETENTION_SECS")? {
        builder = builder.retention(Duration::from_secs(secs));
    }
    if let Some(secs) = env_parse("SITEVAULT_IDLE_TIMEOUT_SECS")? {
        builder = builder.idle_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = env_parse("SITEVAULT_PAGE_TIMEOUT_SECS")? {
        builder = builder.page_timeout(Duration::from_secs(secs));
    }
    if let Some(headless) = env_parse("SITEVAULT_HEADLESS")? {
        builder = builder.headless(headless);
    }

    let destdir =
        std::env::var("SITEVAULT_DESTDIR").unwrap_or_else(|_| "./archive".to_string());
    builder.destdir(destdir).build()
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => {
            let parsed = value
                .parse()
                .map_err(|e| anyhow::anyhow!("{name}={value:?}: {e}"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}
