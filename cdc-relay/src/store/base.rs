use std::future::Future;

use crate::error::RelayResult;
use crate::types::{PartitionId, PartitionPosition};

/// Durable record of partition positions enabling resumption after a restart.
///
/// Implementations must tolerate a full write racing with a partial one. The last write of a
/// partition wins.
pub trait CheckpointStore {
    /// Loads the positions of all partitions indexed by partition, or `None` if nothing was
    /// ever stored.
    fn load(&self) -> impl Future<Output = RelayResult<Option<Vec<PartitionPosition>>>> + Send;

    /// Stores the positions of all partitions, replacing whatever was stored before.
    fn persist(
        &self,
        positions: &[PartitionPosition],
    ) -> impl Future<Output = RelayResult<()>> + Send;

    /// Stores the position of a single partition.
    ///
    /// Fails if no full checkpoint containing `partition` was stored before.
    fn persist_partition(
        &self,
        partition: PartitionId,
        position: PartitionPosition,
    ) -> impl Future<Output = RelayResult<()>> + Send;
}
