use std::fmt;
use std::sync::Arc;

use crate::bail;
use crate::error::{ErrorKind, RelayResult};
use crate::state::position::{PartitionId, PartitionPosition};

/// How a write into [`StreamState`] is announced to the subscribed listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// All partitions are considered dirty, the listener receives every position.
    Full,
    /// Only the written partition changed, the listener receives that position.
    Partial,
    /// In-memory only, the listener is not called.
    Silent,
}

/// Change notification emitted by [`StreamState`] for every non-silent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdatedEvent {
    Full {
        positions: Arc<[PartitionPosition]>,
    },
    Partial {
        partition: PartitionId,
        position: PartitionPosition,
    },
}

impl StateUpdatedEvent {
    pub fn is_partial(&self) -> bool {
        matches!(self, StateUpdatedEvent::Partial { .. })
    }
}

/// Receiver of [`StateUpdatedEvent`]s.
///
/// Listeners run synchronously inside the write that produced the event, so they must not
/// block. Expensive work has to be handed off.
pub trait StateUpdateListener: Send {
    fn on_update(&mut self, event: StateUpdatedEvent);
}

impl<F> StateUpdateListener for F
where
    F: FnMut(StateUpdatedEvent) + Send,
{
    fn on_update(&mut self, event: StateUpdatedEvent) {
        self(event)
    }
}

/// Authoritative replay positions of all partitions of a run.
///
/// The number of partitions is fixed at construction and positions are stored densely by
/// partition index. A single listener can be subscribed to observe writes.
pub struct StreamState {
    positions: Vec<PartitionPosition>,
    listener: Option<Box<dyn StateUpdateListener>>,
}

impl StreamState {
    /// Creates a state where every partition starts from the beginning without an end.
    pub fn new(partition_count: u16) -> Self {
        Self::from_positions(vec![PartitionPosition::beginning(); partition_count as usize])
    }

    /// Creates a state from positions indexed by partition.
    pub fn from_positions(positions: Vec<PartitionPosition>) -> Self {
        Self {
            positions,
            listener: None,
        }
    }

    /// Saturates at [`u16::MAX`], compare [`StreamState::len`] when the exact count matters.
    pub fn partition_count(&self) -> u16 {
        u16::try_from(self.positions.len()).unwrap_or(u16::MAX)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the position of `partition`.
    pub fn get(&self, partition: PartitionId) -> RelayResult<PartitionPosition> {
        match self.positions.get(partition as usize) {
            Some(position) => Ok(*position),
            None => bail!(
                ErrorKind::PartitionOutOfRange,
                "Partition out of range",
                format!(
                    "partition {partition} does not exist, the state has {} partitions",
                    self.positions.len()
                )
            ),
        }
    }

    /// Replaces the position of `partition` and notifies the listener according to `kind`.
    pub fn set(
        &mut self,
        partition: PartitionId,
        position: PartitionPosition,
        kind: UpdateKind,
    ) -> RelayResult<()> {
        let partition_count = self.positions.len();
        let Some(slot) = self.positions.get_mut(partition as usize) else {
            bail!(
                ErrorKind::PartitionOutOfRange,
                "Partition out of range",
                format!("partition {partition} does not exist, the state has {partition_count} partitions")
            );
        };
        *slot = position;

        match kind {
            UpdateKind::Full => self.notify_full(),
            UpdateKind::Partial => self.notify(StateUpdatedEvent::Partial {
                partition,
                position,
            }),
            UpdateKind::Silent => {}
        }

        Ok(())
    }

    /// Emits a full update for the current positions without changing them.
    pub fn notify_full(&mut self) {
        let event = StateUpdatedEvent::Full {
            positions: self.snapshot(),
        };
        self.notify(event);
    }

    /// Returns a read-only copy of all positions.
    pub fn snapshot(&self) -> Arc<[PartitionPosition]> {
        Arc::from(self.positions.as_slice())
    }

    pub fn positions(&self) -> &[PartitionPosition] {
        &self.positions
    }

    /// Registers `listener`, replacing any previously subscribed one.
    pub fn subscribe<L>(&mut self, listener: L)
    where
        L: StateUpdateListener + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Removes and returns the subscribed listener.
    pub fn unsubscribe(&mut self) -> Option<Box<dyn StateUpdateListener>> {
        self.listener.take()
    }

    fn notify(&mut self, event: StateUpdatedEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_update(event);
        }
    }
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("positions", &self.positions)
            .field("subscribed", &self.listener.is_some())
            .finish()
    }
}

impl Clone for StreamState {
    /// Clones the positions only, the clone has no listener.
    fn clone(&self) -> Self {
        Self::from_positions(self.positions.clone())
    }
}

impl PartialEq for StreamState {
    fn eq(&self, other: &Self) -> bool {
        self.positions == other.positions
    }
}
