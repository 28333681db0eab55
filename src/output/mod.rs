//! Output naming and final placement of captured page artifacts.
//!
//! Workers write into anonymous staging files under a temp directory; once a
//! page completes, the job manager moves the staged file to its final
//! location. A template containing `{host}`, `{date}` or `{seqnum}` yields
//! one file per page; a plain filename yields a single per-job file that
//! staged captures are appended to.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use log::debug;

/// Return true if `s` contains template fields.
#[must_use]
pub fn has_template(s: &str) -> bool {
    s.contains('{') && s.contains('}')
}

/// Render an output template. `{date}` expands to an ISO-8601 timestamp with
/// UTC offset, `{seqnum}` is 1-based and strictly increasing per job.
#[must_use]
pub fn render_template(template: &str, host: &str, seqnum: u64) -> String {
    let date = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
    template
        .replace("{host}", host)
        .replace("{date}", &date)
        .replace("{seqnum}", &seqnum.to_string())
}

/// Places completed captures for one job.
#[derive(Debug)]
pub struct OutputPlacer {
    destdir: PathBuf,
    template: String,
    per_page: bool,
}

impl OutputPlacer {
    /// `template` is a filename relative to `destdir`. For a non-templated
    /// (single-file) output the target must not exist yet.
    pub fn new(destdir: impl Into<PathBuf>, template: impl Into<String>) -> Result<Self> {
        let destdir = destdir.into();
        let template = template.into();
        let per_page = has_template(&template);
        if !per_page && destdir.join(&template).exists() {
            anyhow::bail!("output file {template:?} exists");
        }
        Ok(Self {
            destdir,
            template,
            per_page,
        })
    }

    /// Move one staged capture to its final place and return that path.
    ///
    /// Per-page mode renames the staged file to a freshly rendered template
    /// expansion, regenerating the name rather than replacing an existing
    /// file. Single-file mode appends the staged bytes to the job's output
    /// file and removes the staging file. The placing caller is
    /// single-threaded per job, which makes both paths race-free.
    pub async fn place(&self, staged: &Path, host: &str, seqnum: u64) -> Result<PathBuf> {
        if self.per_page {
            let mut last = None;
            loop {
                let name = render_template(&self.template, host, seqnum);
                // the date field changes between iterations, so this terminates
                anyhow::ensure!(last.as_deref() != Some(name.as_str()), "template {:?} cannot produce a fresh name", self.template);
                let dest = self.destdir.join(&name);
                if dest.exists() {
                    last = Some(name);
                    continue;
                }
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                tokio::fs::rename(staged, &dest)
                    .await
                    .with_context(|| format!("moving capture to {}", dest.display()))?;
                debug!("placed capture at {}", dest.display());
                return Ok(dest);
            }
        } else {
            let dest = self.destdir.join(&self.template);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let mut out = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&dest)
                .await
                .with_context(|| format!("opening {}", dest.display()))?;
            let mut input = tokio::fs::File::open(staged)
                .await
                .with_context(|| format!("opening staged {}", staged.display()))?;
            tokio::io::copy(&mut input, &mut out)
                .await
                .context("appending staged capture")?;
            tokio::fs::remove_file(staged).await.ok();
            debug!("appended capture to {}", dest.display());
            Ok(dest)
        }
    }
}
