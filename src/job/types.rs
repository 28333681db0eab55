//! Job records, aggregated statistics and the lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::job::JobId;
use crate::policy::RecursionPolicy;
use crate::utils::pretty_bytes;

/// Aggregated per-job counters.
///
/// Mutated only by the job's scheduler loop and, once reported, by the job
/// manager; both are single-threaded with respect to one job. At terminal
/// state `have == finished + failed + crashed + ignored` and
/// `pending == running == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// URLs queued but not yet dispatched.
    pub pending: u64,
    /// URLs currently being fetched.
    pub running: u64,
    /// URLs ever dequeued (including ones resolved as ignored).
    pub have: u64,
    /// HTTP requests issued by workers.
    pub requests: u64,
    /// Pages captured successfully.
    pub finished: u64,
    /// Pages that failed to load.
    pub failed: u64,
    /// Pages whose worker or browser crashed.
    pub crashed: u64,
    /// URLs dropped without a fetch (malformed, drained at timeout/revoke).
    pub ignored: u64,
    /// Payload bytes received, serialized under its historical wire name.
    #[serde(rename = "bytesRcv")]
    pub bytes_rcv: u64,
}

impl Stats {
    /// Conservation check for terminal jobs.
    #[must_use]
    pub fn is_terminal_consistent(&self) -> bool {
        self.pending == 0
            && self.running == 0
            && self.have == self.finished + self.failed + self.crashed + self.ignored
    }
}

/// Job lifecycle states. Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Finished,
    Aborted,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Finished)
                | (Self::Running, Self::Aborted)
                | (Self::Pending, Self::Aborted)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Why a job ended up aborted; carried in the terminal event payload so
/// consumers can tell an operator revoke from resource exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortReason {
    /// Explicit `r <id>` from the control channel.
    Revoked,
    /// A worker could not be allocated.
    Resources,
}

/// A single opaque cookie override, injected verbatim into the session jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl FromStr for Cookie {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => Ok(Self {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            }),
            _ => Err(ControlError::Malformed(format!("invalid cookie {s:?}"))),
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// One top-level archive request.
///
/// Created by the job manager on an accepted archive command, mutated only
/// by the manager on scheduler progress callbacks, immutable once terminal.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Canonical root URL.
    pub url: String,
    /// Operator identity that scheduled this job.
    pub owner: String,
    /// Worker concurrency limit for this job.
    pub concurrency: usize,
    pub policy: RecursionPolicy,
    pub insecure: bool,
    pub cookies: Vec<Cookie>,
    pub state: JobState,
    pub queued: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub abort_reason: Option<AbortReason>,
    pub stats: Stats,
}

impl Job {
    /// Apply a state transition, enforcing the state machine.
    pub fn transition(&mut self, next: JobState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        match next {
            JobState::Running => self.started = Some(Utc::now()),
            JobState::Finished | JobState::Aborted => self.finished = Some(Utc::now()),
            JobState::Pending => {}
        }
        self.state = next;
        Ok(())
    }

    /// One-line human-readable status as rendered on the control channel.
    #[must_use]
    pub fn format_status(&self) -> String {
        let s = &self.stats;
        format!(
            "{} ({}) {}. {} pages finished, {} pending; {} crashed, {} requests, {} failed, {} received.",
            self.url,
            self.id,
            self.state,
            s.have,
            s.pending,
            s.crashed,
            s.requests,
            s.failed,
            pretty_bytes(s.bytes_rcv)
        )
    }
}

/// Rejected lifecycle transition; indicates a bug in the caller, never shown
/// to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: JobState,
    pub to: JobState,
}
