//! Error taxonomy for the orchestrator.
//!
//! Worker-local failures ([`FetchError`]) are classified and folded into job
//! statistics; they never escape the scheduler loop. [`ControlError`] and
//! [`PolicyError`] surface to the operator through the control channel
//! without mutating any job state.

use thiserror::Error;

/// Malformed recursion policy specification. Job creation is rejected and no
/// job record exists afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported recursion policy {0:?}")]
pub struct PolicyError(pub String);

/// Errors reported back over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// `s` or `r` named a job id that does not exist.
    #[error("job {0} is unknown")]
    UnknownJob(String),

    /// The command line could not be parsed; nothing was created or altered.
    #[error("malformed command: {0}")]
    Malformed(String),

    /// Recursion policy flag was rejected before job creation.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The orchestrator is shutting down and does not accept new jobs.
    #[error("shutting down, not accepting new jobs")]
    ShuttingDown,
}

/// Classified failure of a single page fetch.
///
/// Each variant maps to exactly one stats counter: `Navigation` and
/// `Protocol` count as `failed`, `Crash` as `crashed`. `Resources` is
/// special: it aborts the whole job, distinguished from an operator revoke
/// in the terminal event payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Page load failure or navigation timeout.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The browser session or worker process crashed.
    #[error("browser session crashed: {0}")]
    Crash(String),

    /// A collaborator script threw or returned malformed data.
    #[error("collaborator script failed: {0}")]
    Protocol(String),

    /// A new worker could not be allocated at all.
    #[error("cannot allocate worker: {0}")]
    Resources(String),
}
