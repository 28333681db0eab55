//! Broadcast bus distributing status events to connected consumers.
//!
//! Append-only, at-most-once: publishing is fire-and-forget and never blocks
//! the control loop. There is no backlog or replay; a consumer sees only
//! events published while it is subscribed, and a consumer that falls behind
//! the channel capacity loses the oldest events (`RecvError::Lagged`).

use log::{debug, trace};
use tokio::sync::broadcast;

use super::types::StatusEvent;

/// Publish/subscribe fan-out for [`StatusEvent`]s.
#[derive(Debug, Clone)]
pub struct StatusBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusBus {
    /// `capacity` bounds the per-subscriber buffer; slow subscribers beyond
    /// it lag rather than stalling publishers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish one event to all currently connected consumers. Returns the
    /// number of consumers that received it; zero consumers is not an error.
    pub fn publish(&self, event: StatusEvent) -> usize {
        match self.sender.send(event) {
            Ok(count) => {
                trace!("published status event to {count} subscribers");
                count
            }
            Err(_) => {
                debug!("published status event with no active subscribers");
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = StatusBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(StatusEvent::started(JobId::from("x"))), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let bus = StatusBus::new(8);
        let mut rx = bus.subscribe();

        let job = JobId::from("lusab-babad-lusab-babad");
        bus.publish(StatusEvent::started(job.clone()));
        bus.publish(StatusEvent::finished(job.clone(), Default::default()));

        assert!(matches!(rx.recv().await.unwrap(), StatusEvent::Started { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            StatusEvent::Finished { .. }
        ));
    }
}
