use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, RelayResult};
use crate::store::base::CheckpointStore;
use crate::types::{PartitionId, PartitionPosition};

#[derive(Debug, Default)]
struct Inner {
    positions: Option<Vec<PartitionPosition>>,
}

/// Checkpoint store keeping positions in memory, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `positions`.
    pub fn with_positions(positions: Vec<PartitionPosition>) -> Self {
        let inner = Inner {
            positions: Some(positions),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the stored positions without going through [`CheckpointStore::load`].
    pub async fn positions(&self) -> Option<Vec<PartitionPosition>> {
        self.inner.lock().await.positions.clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> RelayResult<Option<Vec<PartitionPosition>>> {
        Ok(self.inner.lock().await.positions.clone())
    }

    async fn persist(&self, positions: &[PartitionPosition]) -> RelayResult<()> {
        self.inner.lock().await.positions = Some(positions.to_vec());

        Ok(())
    }

    async fn persist_partition(
        &self,
        partition: PartitionId,
        position: PartitionPosition,
    ) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(slot) = inner
            .positions
            .as_mut()
            .and_then(|positions| positions.get_mut(partition as usize))
        else {
            bail!(
                ErrorKind::CheckpointWriteFailed,
                "No stored checkpoint contains the partition",
                format!("partition {partition} has no stored position to update")
            );
        };
        *slot = position;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SEQUENCE_UNBOUNDED;

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let store = MemoryCheckpointStore::new();

        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn partial_write_updates_a_single_partition() {
        let store = MemoryCheckpointStore::new();
        store
            .persist(&[PartitionPosition::beginning(), PartitionPosition::beginning()])
            .await
            .unwrap();
        let position = PartitionPosition::new(2, 99, SEQUENCE_UNBOUNDED);

        store.persist_partition(1, position).await.unwrap();

        assert_eq!(
            store.load().await.unwrap(),
            Some(vec![PartitionPosition::beginning(), position])
        );
    }

    #[tokio::test]
    async fn partial_write_without_full_checkpoint_fails() {
        let store = MemoryCheckpointStore::new();

        let err = store
            .persist_partition(0, PartitionPosition::beginning())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CheckpointWriteFailed);
    }
}
