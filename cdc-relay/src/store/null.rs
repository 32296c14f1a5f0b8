use crate::error::RelayResult;
use crate::store::base::CheckpointStore;
use crate::types::{PartitionId, PartitionPosition};

/// Checkpoint store that discards every write and never has anything to load.
///
/// Runs using it always start fresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCheckpointStore;

impl CheckpointStore for NullCheckpointStore {
    async fn load(&self) -> RelayResult<Option<Vec<PartitionPosition>>> {
        Ok(None)
    }

    async fn persist(&self, _positions: &[PartitionPosition]) -> RelayResult<()> {
        Ok(())
    }

    async fn persist_partition(
        &self,
        _partition: PartitionId,
        _position: PartitionPosition,
    ) -> RelayResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_discarded() {
        let store = NullCheckpointStore;

        store
            .persist(&[PartitionPosition::beginning()])
            .await
            .unwrap();
        store
            .persist_partition(0, PartitionPosition::beginning())
            .await
            .unwrap();

        assert_eq!(store.load().await.unwrap(), None);
    }
}
