use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures::Stream;

use crate::error::RelayResult;
use crate::types::{FailoverLogEntry, PartitionId, PartitionPosition, StreamEvent};

/// Lazy, in-order sequence of events of one partition.
///
/// The stream ends when the transport closes and yields an error when it fails.
pub type EventStream = Pin<Box<dyn Stream<Item = RelayResult<StreamEvent>> + Send>>;

/// Response of the cluster to a stream-open request.
pub struct OpenedStream {
    /// Failover points reported for the partition, possibly empty.
    pub failover_log: Vec<FailoverLogEntry>,
    pub events: EventStream,
}

impl OpenedStream {
    pub fn new(failover_log: Vec<FailoverLogEntry>, events: EventStream) -> Self {
        Self {
            failover_log,
            events,
        }
    }
}

impl fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedStream")
            .field("failover_log", &self.failover_log)
            .finish_non_exhaustive()
    }
}

/// Connection to the storage cluster exposing the replication stream.
///
/// The bootstrap methods are called once per run, in order, each under the configured
/// bootstrap timeout.
pub trait ClusterClient {
    /// Establishes cluster membership from the configured seed nodes.
    fn seed_nodes(&self) -> impl Future<Output = RelayResult<()>> + Send;

    /// Opens the bucket whose partitions are relayed.
    fn open_bucket(&self) -> impl Future<Output = RelayResult<()>> + Send;

    /// Returns the number of partitions of the opened bucket.
    fn partition_count(&self) -> impl Future<Output = RelayResult<u16>> + Send;

    /// Opens the stream of `partition` starting at `position`.
    fn open_partition_stream(
        &self,
        stream_name: &str,
        partition: PartitionId,
        position: PartitionPosition,
    ) -> impl Future<Output = RelayResult<OpenedStream>> + Send;
}
