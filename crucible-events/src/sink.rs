//! Progress sinks
//!
//! A sink is the publish-to-topic transport. The in-process broadcast sink
//! distributes events to any number of subscribers over a tokio broadcast
//! channel; remote transports implement the same trait.

use crate::{ProgressEvent, ProgressEventKind};
use crucible_core::ExperimentId;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Failure reported by a sink. The publisher logs and drops it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Sink closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Destination for progress events.
///
/// `publish` must not block: the execution loop calls it between trials.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: &ProgressEvent) -> Result<(), PublishError>;
}

/// In-process sink backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every future event.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Receive future events of one experiment only.
    pub fn subscribe_experiment(&self, experiment_id: ExperimentId) -> ExperimentSubscription {
        ExperimentSubscription {
            experiment_id,
            rx: self.tx.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ProgressSink for BroadcastSink {
    fn publish(&self, event: &ProgressEvent) -> Result<(), PublishError> {
        let kind: ProgressEventKind = event.kind();
        match self.tx.send(event.clone()) {
            Ok(receivers) => {
                debug!(
                    experiment_id = %event.experiment_id,
                    event_type = kind.as_str(),
                    receivers,
                    "Broadcast progress event"
                );
            }
            Err(_) => {
                // No receivers connected - this is fine
                debug!(
                    experiment_id = %event.experiment_id,
                    event_type = kind.as_str(),
                    "No receivers for progress event"
                );
            }
        }
        Ok(())
    }
}

/// Subscription filtered to a single experiment.
#[derive(Debug)]
pub struct ExperimentSubscription {
    experiment_id: ExperimentId,
    rx: broadcast::Receiver<ProgressEvent>,
}

impl ExperimentSubscription {
    pub fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    /// Next event for this experiment, or `None` once the sink is dropped.
    ///
    /// Lagged events are skipped with a warning.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.experiment_id == self.experiment_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        experiment_id = %self.experiment_id,
                        skipped,
                        "Subscriber lagged, some events were dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventPayload;

    fn paused(experiment_id: ExperimentId) -> ProgressEvent {
        ProgressEvent::new(
            experiment_id,
            EventPayload::ExperimentPaused {
                completed_runs: 1,
                remaining_runs: 1,
            },
        )
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let sink = BroadcastSink::new(8);
        assert_eq!(sink.receiver_count(), 0);
        assert!(sink.publish(&paused(ExperimentId::now_v7())).is_ok());
    }

    #[tokio::test]
    async fn test_subscription_filters_by_experiment() {
        let sink = BroadcastSink::new(8);
        let wanted = ExperimentId::now_v7();
        let other = ExperimentId::now_v7();
        let mut subscription = sink.subscribe_experiment(wanted);

        sink.publish(&paused(other)).unwrap();
        sink.publish(&paused(wanted)).unwrap();

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.experiment_id, wanted);
    }

    #[tokio::test]
    async fn test_subscription_ends_when_sink_dropped() {
        let sink = BroadcastSink::new(8);
        let mut subscription = sink.subscribe_experiment(ExperimentId::now_v7());
        drop(sink);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let sink = BroadcastSink::new(2);
        let id = ExperimentId::now_v7();
        let mut subscription = sink.subscribe_experiment(id);

        for _ in 0..5 {
            sink.publish(&paused(id)).unwrap();
        }

        assert!(subscription.recv().await.is_some());
    }
}
