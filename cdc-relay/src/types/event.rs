use bytes::Bytes;

use crate::state::position::PartitionId;

/// Control event announcing the bounds of the snapshot the following events belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMarker {
    pub partition: PartitionId,
    pub start_sequence: u64,
    pub end_sequence: u64,
    pub flags: u32,
}

/// A document was created or updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    pub partition: PartitionId,
    pub key: Bytes,
    pub value: Bytes,
    pub by_sequence: u64,
    pub rev_sequence: u64,
    pub cas: u64,
    pub flags: u32,
    pub expiry: u32,
}

/// A document was removed, either explicitly or because it expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEvent {
    pub partition: PartitionId,
    pub key: Bytes,
    pub by_sequence: u64,
    pub rev_sequence: u64,
    pub cas: u64,
}

/// Why the cluster closed a partition stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEndReason {
    /// The requested end sequence was reached.
    Ok,
    /// The stream was closed on request.
    Closed,
    /// The partition changed state on the cluster, e.g. after a failover.
    StateChanged,
    Disconnected,
    /// The consumer did not keep up with the stream.
    TooSlow,
}

/// An event decoded from a partition stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    SnapshotMarker(SnapshotMarker),
    Mutation(MutationEvent),
    Deletion(DeletionEvent),
    Expiration(DeletionEvent),
    StreamEnd {
        partition: PartitionId,
        reason: StreamEndReason,
    },
}

impl StreamEvent {
    /// Returns the partition the event was received on.
    pub fn partition(&self) -> PartitionId {
        match self {
            StreamEvent::SnapshotMarker(marker) => marker.partition,
            StreamEvent::Mutation(mutation) => mutation.partition,
            StreamEvent::Deletion(deletion) | StreamEvent::Expiration(deletion) => {
                deletion.partition
            }
            StreamEvent::StreamEnd { partition, .. } => *partition,
        }
    }

    /// Returns the sequence number of data events.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            StreamEvent::Mutation(mutation) => Some(mutation.by_sequence),
            StreamEvent::Deletion(deletion) | StreamEvent::Expiration(deletion) => {
                Some(deletion.by_sequence)
            }
            StreamEvent::SnapshotMarker(_) | StreamEvent::StreamEnd { .. } => None,
        }
    }

    pub fn is_boundary_marker(&self) -> bool {
        matches!(self, StreamEvent::SnapshotMarker(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_snapshot_markers_are_boundary_markers() {
        let marker = StreamEvent::SnapshotMarker(SnapshotMarker {
            partition: 3,
            start_sequence: 200,
            end_sequence: 250,
            flags: 0,
        });
        let deletion = StreamEvent::Expiration(DeletionEvent {
            partition: 5,
            key: Bytes::from_static(b"user::1"),
            by_sequence: 9,
            rev_sequence: 2,
            cas: 77,
        });

        assert!(marker.is_boundary_marker());
        assert_eq!(marker.partition(), 3);
        assert_eq!(marker.sequence(), None);
        assert!(!deletion.is_boundary_marker());
        assert_eq!(deletion.partition(), 5);
        assert_eq!(deletion.sequence(), Some(9));
    }
}
