use bytes::Bytes;

use crate::types::{
    DeletionEvent, MutationEvent, PartitionId, SnapshotMarker, StreamEndReason, StreamEvent,
};

pub fn mutation(partition: PartitionId, by_sequence: u64) -> StreamEvent {
    StreamEvent::Mutation(MutationEvent {
        partition,
        key: Bytes::from(format!("key-{partition}-{by_sequence}")),
        value: Bytes::from(format!("{{\"seq\":{by_sequence}}}")),
        by_sequence,
        rev_sequence: 1,
        cas: by_sequence,
        flags: 0,
        expiry: 0,
    })
}

pub fn deletion(partition: PartitionId, by_sequence: u64) -> StreamEvent {
    StreamEvent::Deletion(DeletionEvent {
        partition,
        key: Bytes::from(format!("key-{partition}-{by_sequence}")),
        by_sequence,
        rev_sequence: 2,
        cas: by_sequence,
    })
}

pub fn snapshot_marker(partition: PartitionId, start_sequence: u64, end_sequence: u64) -> StreamEvent {
    StreamEvent::SnapshotMarker(SnapshotMarker {
        partition,
        start_sequence,
        end_sequence,
        flags: 0,
    })
}

pub fn stream_end(partition: PartitionId) -> StreamEvent {
    StreamEvent::StreamEnd {
        partition,
        reason: StreamEndReason::Ok,
    }
}

