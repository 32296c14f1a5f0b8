use tokio::sync::mpsc;

use crate::types::StreamEvent;

/// Producer side of the bounded queue shared with the downstream consumer.
pub type EventQueueTx = mpsc::Sender<StreamEvent>;

/// Consumer side of the bounded queue, drained by the downstream consumer.
pub type EventQueueRx = mpsc::Receiver<StreamEvent>;

/// Creates the bounded downstream queue holding up to `capacity` events.
///
/// A capacity of zero is raised to one, since a queue must be able to hold an event.
pub fn create_event_queue(capacity: usize) -> (EventQueueTx, EventQueueRx) {
    mpsc::channel(capacity.max(1))
}
