//! Status bus message types.
//!
//! Every message is a JSON object carrying a `date` timestamp and a `uuid`
//! discriminator naming the event kind. The discriminators are fixed,
//! versioned constants — part of the wire contract existing dashboard
//! consumers depend on — so they are spelled out verbatim here and nowhere
//! else. Serialization happens centrally through these types; consumers must
//! never infer message shape from payload fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{AbortReason, JobId, Stats};

/// Discriminator of job-accepted messages.
pub const UUID_ACCEPTED: &str = "36cc34a6-061b-4cc5-84a9-4ab6552c8d75";
/// Discriminator of pending→running transitions.
pub const UUID_STARTED: &str = "46e62d60-f498-4ab0-90e1-d08a073b10fb";
/// Discriminator of running→finished transitions.
pub const UUID_FINISHED: &str = "7b40ffbb-faab-4224-90ed-cd4febd8f7ec";
/// Discriminator of →aborted transitions.
pub const UUID_ABORTED: &str = "865b3b3e-a54a-4a56-a545-f38a37bac295";
/// Discriminator of the envelope wrapping nested per-job messages.
pub const UUID_ENVELOPE: &str = "5c0f9a11-dcd8-4182-a60f-54f4d3ab3687";
/// Envelope inner discriminator: stats snapshot.
pub const UUID_STATS: &str = "24d92d16-770e-4088-b769-4020e127a7ff";
/// Envelope inner discriminator: recursion-engine snapshot.
pub const UUID_RECURSING: &str = "5b8498e4-868d-413c-a67e-004516b8452c";
/// Envelope inner discriminator: single fetched-URL notice.
pub const UUID_FETCH: &str = "d1288fbe-8bae-42c8-af8c-f2fa8b41794f";

/// A message published on the status bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "uuid")]
pub enum StatusEvent {
    /// Job created and queued.
    #[serde(rename = "36cc34a6-061b-4cc5-84a9-4ab6552c8d75")]
    Accepted {
        date: DateTime<Utc>,
        job: JobId,
        url: String,
        user: String,
    },

    /// First worker dispatched; the job is now running.
    #[serde(rename = "46e62d60-f498-4ab0-90e1-d08a073b10fb")]
    Started { date: DateTime<Utc>, job: JobId },

    /// Job completed; carries the final stats snapshot.
    #[serde(rename = "7b40ffbb-faab-4224-90ed-cd4febd8f7ec")]
    Finished {
        date: DateTime<Utc>,
        job: JobId,
        stats: Stats,
    },

    /// Job aborted, either revoked or out of worker resources.
    #[serde(rename = "865b3b3e-a54a-4a56-a545-f38a37bac295")]
    Aborted {
        date: DateTime<Utc>,
        job: JobId,
        reason: AbortReason,
        stats: Stats,
    },

    /// Wraps a nested per-job progress message.
    #[serde(rename = "5c0f9a11-dcd8-4182-a60f-54f4d3ab3687")]
    Envelope {
        date: DateTime<Utc>,
        job: JobId,
        data: JobMessage,
    },
}

/// Nested per-job messages carried inside [`StatusEvent::Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "uuid")]
pub enum JobMessage {
    /// Aggregated stats snapshot; counters are flattened onto the object.
    #[serde(rename = "24d92d16-770e-4088-b769-4020e127a7ff")]
    Stats {
        #[serde(flatten)]
        stats: Stats,
    },

    /// Recursion engine snapshot: queue and in-flight sizes.
    #[serde(rename = "5b8498e4-868d-413c-a67e-004516b8452c")]
    Recursing { pending: u64, have: u64, running: u64 },

    /// One URL was handed to a worker.
    #[serde(rename = "d1288fbe-8bae-42c8-af8c-f2fa8b41794f")]
    Fetch { url: String },
}

impl StatusEvent {
    #[must_use]
    pub fn accepted(job: JobId, url: String, user: String) -> Self {
        Self::Accepted {
            date: Utc::now(),
            job,
            url,
            user,
        }
    }

    #[must_use]
    pub fn started(job: JobId) -> Self {
        Self::Started {
            date: Utc::now(),
            job,
        }
    }

    #[must_use]
    pub fn finished(job: JobId, stats: Stats) -> Self {
        Self::Finished {
            date: Utc::now(),
            job,
            stats,
        }
    }

    #[must_use]
    pub fn aborted(job: JobId, reason: AbortReason, stats: Stats) -> Self {
        Self::Aborted {
            date: Utc::now(),
            job,
            reason,
            stats,
        }
    }

    #[must_use]
    pub fn envelope(job: JobId, data: JobMessage) -> Self {
        Self::Envelope {
            date: Utc::now(),
            job,
            data,
        }
    }

    /// Job this event concerns.
    #[must_use]
    pub fn job(&self) -> &JobId {
        match self {
            Self::Accepted { job, .. }
            | Self::Started { job, .. }
            | Self::Finished { job, .. }
            | Self::Aborted { job, .. }
            | Self::Envelope { job, .. } => job,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators_are_verbatim_on_the_wire() {
        let ev = StatusEvent::started(JobId::from("lusab-babad-lusab-babad"));
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["uuid"], UUID_STARTED);
        assert_eq!(v["job"], "lusab-babad-lusab-babad");
        assert!(v["date"].is_string());
    }

    #[test]
    fn envelope_nests_inner_discriminator() {
        let ev = StatusEvent::envelope(
            JobId::from("lusab-babad-lusab-babad"),
            JobMessage::Fetch {
                url: "https://example.com/".to_string(),
            },
        );
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["uuid"], UUID_ENVELOPE);
        assert_eq!(v["data"]["uuid"], UUID_FETCH);
        assert_eq!(v["data"]["url"], "https://example.com/");
    }

    #[test]
    fn stats_envelope_flattens_counters() {
        let stats = Stats {
            requests: 4,
            bytes_rcv: 2048,
            ..Stats::default()
        };
        let ev = StatusEvent::envelope(
            JobId::from("lusab-babad-lusab-babad"),
            JobMessage::Stats { stats },
        );
        let v: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["data"]["uuid"], UUID_STATS);
        assert_eq!(v["data"]["requests"], 4);
        // historical wire name of the byte counter
        assert_eq!(v["data"]["bytesRcv"], 2048);
    }

    #[test]
    fn terminal_event_roundtrips() {
        let ev = StatusEvent::aborted(
            JobId::from("lusab-babad-lusab-babad"),
            AbortReason::Resources,
            Stats::default(),
        );
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(UUID_ABORTED));
        assert!(json.contains("\"reason\":\"resources\""));
        let back: StatusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
