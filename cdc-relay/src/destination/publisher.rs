use std::time::Duration;

use cdc_relay_config::shared::PublishPolicy;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::warn;

use crate::bail;
use crate::destination::queue::EventQueueTx;
use crate::error::{ErrorKind, RelayResult};
use crate::metrics::RelayStats;
use crate::types::StreamEvent;

/// Result of offering an event to the downstream queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The event is now owned by the downstream queue.
    Published,
    /// The queue had no capacity and the event was discarded.
    Dropped,
}

/// Offers data events to the bounded downstream queue without stalling the caller indefinitely.
///
/// With [`PublishPolicy::DropWhenFull`] the offer never waits. With
/// [`PublishPolicy::BlockWithTimeout`] it waits at most the configured timeout. Either way a
/// full queue results in a counted drop, never in an error. Events are offered in the order the
/// publisher is called, so per-partition order is preserved.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    queue_tx: EventQueueTx,
    policy: PublishPolicy,
    stats: RelayStats,
}

impl EventPublisher {
    pub fn new(queue_tx: EventQueueTx, policy: PublishPolicy, stats: RelayStats) -> Self {
        Self {
            queue_tx,
            policy,
            stats,
        }
    }

    /// Offers `event` to the queue.
    ///
    /// Fails only when the downstream consumer went away.
    pub async fn publish(&self, event: StreamEvent) -> RelayResult<PublishOutcome> {
        let partition = event.partition();
        let outcome = match self.policy {
            PublishPolicy::DropWhenFull => match self.queue_tx.try_send(event) {
                Ok(()) => PublishOutcome::Published,
                Err(TrySendError::Full(_)) => PublishOutcome::Dropped,
                Err(TrySendError::Closed(_)) => Self::closed()?,
            },
            PublishPolicy::BlockWithTimeout { timeout_ms } => {
                match self
                    .queue_tx
                    .send_timeout(event, Duration::from_millis(timeout_ms))
                    .await
                {
                    Ok(()) => PublishOutcome::Published,
                    Err(SendTimeoutError::Timeout(_)) => PublishOutcome::Dropped,
                    Err(SendTimeoutError::Closed(_)) => Self::closed()?,
                }
            }
        };

        match outcome {
            PublishOutcome::Published => self.stats.record_published(),
            PublishOutcome::Dropped => {
                warn!(partition, "downstream queue is full, event dropped");
                self.stats.record_dropped();
            }
        }

        Ok(outcome)
    }

    fn closed() -> RelayResult<PublishOutcome> {
        bail!(
            ErrorKind::DownstreamClosed,
            "Downstream queue closed",
            "the downstream consumer dropped its end of the event queue"
        );
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::destination::queue::create_event_queue;
    use crate::types::MutationEvent;

    fn mutation(partition: u16, by_sequence: u64) -> StreamEvent {
        StreamEvent::Mutation(MutationEvent {
            partition,
            key: Bytes::from(format!("key-{by_sequence}")),
            value: Bytes::from_static(b"{}"),
            by_sequence,
            rev_sequence: 1,
            cas: by_sequence,
            flags: 0,
            expiry: 0,
        })
    }

    #[tokio::test]
    async fn full_queue_drops_without_failing() {
        let stats = RelayStats::new();
        let (queue_tx, mut queue_rx) = create_event_queue(1);
        let publisher = EventPublisher::new(queue_tx, PublishPolicy::DropWhenFull, stats.clone());

        assert_eq!(
            publisher.publish(mutation(0, 1)).await.unwrap(),
            PublishOutcome::Published
        );
        assert_eq!(
            publisher.publish(mutation(0, 2)).await.unwrap(),
            PublishOutcome::Dropped
        );

        assert_eq!(stats.events_published(), 1);
        assert_eq!(stats.events_dropped(), 1);
        assert_eq!(queue_rx.recv().await, Some(mutation(0, 1)));
    }

    #[tokio::test]
    async fn events_are_offered_in_order() {
        let (queue_tx, mut queue_rx) = create_event_queue(8);
        let publisher = EventPublisher::new(queue_tx, PublishPolicy::DropWhenFull, RelayStats::new());

        for sequence in 1..=5 {
            publisher.publish(mutation(2, sequence)).await.unwrap();
        }

        for sequence in 1..=5 {
            assert_eq!(queue_rx.recv().await.unwrap().sequence(), Some(sequence));
        }
    }

    #[tokio::test]
    async fn blocking_policy_waits_for_capacity() {
        let stats = RelayStats::new();
        let (queue_tx, mut queue_rx) = create_event_queue(1);
        let publisher = EventPublisher::new(
            queue_tx,
            PublishPolicy::BlockWithTimeout { timeout_ms: 5_000 },
            stats.clone(),
        );
        publisher.publish(mutation(0, 1)).await.unwrap();

        let consumer = tokio::spawn(async move {
            let first = queue_rx.recv().await;
            let second = queue_rx.recv().await;
            (first, second)
        });

        assert_eq!(
            publisher.publish(mutation(0, 2)).await.unwrap(),
            PublishOutcome::Published
        );
        let (first, second) = consumer.await.unwrap();
        assert_eq!(first.and_then(|e| e.sequence()), Some(1));
        assert_eq!(second.and_then(|e| e.sequence()), Some(2));
        assert_eq!(stats.events_dropped(), 0);
    }

    #[tokio::test]
    async fn blocking_policy_drops_after_the_timeout() {
        let stats = RelayStats::new();
        let (queue_tx, _queue_rx) = create_event_queue(1);
        let publisher = EventPublisher::new(
            queue_tx,
            PublishPolicy::BlockWithTimeout { timeout_ms: 20 },
            stats.clone(),
        );
        publisher.publish(mutation(0, 1)).await.unwrap();

        assert_eq!(
            publisher.publish(mutation(0, 2)).await.unwrap(),
            PublishOutcome::Dropped
        );
        assert_eq!(stats.events_dropped(), 1);
    }

    #[tokio::test]
    async fn closed_queue_is_an_error() {
        let (queue_tx, queue_rx) = create_event_queue(4);
        drop(queue_rx);
        let publisher = EventPublisher::new(queue_tx, PublishPolicy::DropWhenFull, RelayStats::new());

        let err = publisher.publish(mutation(0, 1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DownstreamClosed);
    }
}
