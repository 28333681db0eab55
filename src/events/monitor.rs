//! Reference aggregating consumer for the status stream.
//!
//! Reconstructs job state purely from events observed after subscribing:
//! a bounded ring buffer of recently fetched URLs per job, the latest
//! request/byte counters, and global state totals across all jobs. This is
//! the aggregation a dashboard client performs; it is also used by tests to
//! assert stream ordering.

use std::collections::{HashMap, VecDeque};

use crate::job::{JobId, JobState};

use super::types::{JobMessage, StatusEvent};

/// Aggregated view of one job as seen from the stream.
#[derive(Debug, Clone)]
pub struct JobView {
    pub state: JobState,
    pub url: Option<String>,
    pub owner: Option<String>,
    /// Most recently fetched URLs, oldest first, capped at the monitor's
    /// ring capacity.
    pub recent: VecDeque<String>,
    pub requests: u64,
    pub bytes_rcv: u64,
}

impl JobView {
    fn new() -> Self {
        Self {
            state: JobState::Pending,
            url: None,
            owner: None,
            recent: VecDeque::new(),
            requests: 0,
            bytes_rcv: 0,
        }
    }
}

/// Global totals across all jobs the monitor has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    pub aborted: usize,
}

/// Stream aggregator with a fixed per-job ring capacity (drop-oldest).
#[derive(Debug)]
pub struct StreamMonitor {
    ring_capacity: usize,
    jobs: HashMap<JobId, JobView>,
}

impl StreamMonitor {
    #[must_use]
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring_capacity,
            jobs: HashMap::new(),
        }
    }

    /// Fold one observed event into the aggregate.
    pub fn observe(&mut self, event: &StatusEvent) {
        let view = self
            .jobs
            .entry(event.job().clone())
            .or_insert_with(JobView::new);

        match event {
            StatusEvent::Accepted { url, user, .. } => {
                view.state = JobState::Pending;
                view.url = Some(url.clone());
                view.owner = Some(user.clone());
            }
            StatusEvent::Started { .. } => view.state = JobState::Running,
            StatusEvent::Finished { stats, .. } => {
                view.state = JobState::Finished;
                view.requests = stats.requests;
                view.bytes_rcv = stats.bytes_rcv;
            }
            StatusEvent::Aborted { stats, .. } => {
                view.state = JobState::Aborted;
                view.requests = stats.requests;
                view.bytes_rcv = stats.bytes_rcv;
            }
            StatusEvent::Envelope { data, .. } => match data {
                JobMessage::Stats { stats } => {
                    view.requests = stats.requests;
                    view.bytes_rcv = stats.bytes_rcv;
                }
                JobMessage::Fetch { url } => {
                    if view.recent.len() == self.ring_capacity {
                        view.recent.pop_front();
                    }
                    view.recent.push_back(url.clone());
                }
                JobMessage::Recursing { .. } => {}
            },
        }
    }

    #[must_use]
    pub fn job(&self, id: &JobId) -> Option<&JobView> {
        self.jobs.get(id)
    }

    #[must_use]
    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for view in self.jobs.values() {
            match view.state {
                JobState::Pending => totals.pending += 1,
                JobState::Running => totals.running += 1,
                JobState::Finished => totals.finished += 1,
                JobState::Aborted => totals.aborted += 1,
            }
        }
        totals
    }
}
