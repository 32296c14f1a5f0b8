use tracing::debug;

use crate::error::RelayResult;
use crate::state::stream::{StreamState, UpdateKind};
use crate::types::{PartitionPosition, SnapshotMarker};

/// Computes the position of a partition after it entered the snapshot announced by `marker`.
///
/// Replay never resumes inside a snapshot, so the cursor moves to the end of the announced
/// snapshot. The end of the previous snapshot is retained as a lower fence.
pub fn enter_snapshot(previous: PartitionPosition, marker: &SnapshotMarker) -> PartitionPosition {
    PartitionPosition {
        epoch: previous.epoch,
        start_sequence: marker.end_sequence,
        end_sequence: previous.end_sequence,
        snapshot_start_sequence: marker.end_sequence,
        snapshot_end_sequence: previous.snapshot_end_sequence,
    }
}

/// Records a snapshot boundary for the marker's partition.
///
/// A boundary is a self-consistent point, so the write is a full update and gets checkpointed.
pub fn track_snapshot_marker(
    state: &mut StreamState,
    marker: &SnapshotMarker,
) -> RelayResult<PartitionPosition> {
    let previous = state.get(marker.partition)?;
    let position = enter_snapshot(previous, marker);

    debug!(
        partition = marker.partition,
        snapshot_start = marker.start_sequence,
        snapshot_end = marker.end_sequence,
        "snapshot marker received"
    );

    state.set(marker.partition, position, UpdateKind::Full)?;

    Ok(position)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::state::stream::StateUpdatedEvent;
    use crate::types::SEQUENCE_UNBOUNDED;

    fn marker(partition: u16, start_sequence: u64, end_sequence: u64) -> SnapshotMarker {
        SnapshotMarker {
            partition,
            start_sequence,
            end_sequence,
            flags: 0,
        }
    }

    #[test]
    fn entering_a_snapshot_moves_the_cursor_to_its_end() {
        let previous = PartitionPosition {
            epoch: 3,
            start_sequence: 200,
            end_sequence: SEQUENCE_UNBOUNDED,
            snapshot_start_sequence: 200,
            snapshot_end_sequence: 200,
        };

        let position = enter_snapshot(previous, &marker(0, 200, 250));

        assert_eq!(position.epoch, 3);
        assert_eq!(position.start_sequence, 250);
        assert_eq!(position.end_sequence, SEQUENCE_UNBOUNDED);
        assert_eq!(position.snapshot_start_sequence, 250);
        assert_eq!(position.snapshot_end_sequence, 200);
    }

    #[test]
    fn cursor_never_precedes_the_snapshot_start() {
        let mut position = PartitionPosition::beginning();
        for (start, end) in [(0, 10), (10, 10), (11, 40), (41, 41), (42, 1_000)] {
            position = enter_snapshot(position, &marker(0, start, end));

            assert!(position.snapshot_start_sequence <= position.start_sequence);
            assert!(position.start_sequence <= position.end_sequence);
        }
    }

    #[test]
    fn repeated_markers_overwrite_the_position() {
        let mut state = StreamState::new(1);

        track_snapshot_marker(&mut state, &marker(0, 0, 10)).unwrap();
        let position = track_snapshot_marker(&mut state, &marker(0, 11, 20)).unwrap();

        assert_eq!(position.start_sequence, 20);
        assert_eq!(position.snapshot_start_sequence, 20);
        assert_eq!(state.get(0).unwrap(), position);
    }

    #[test]
    fn tracking_a_marker_emits_a_full_update() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut state = StreamState::new(2);
        let recorded = events.clone();
        state.subscribe(move |event: StateUpdatedEvent| recorded.lock().unwrap().push(event));

        track_snapshot_marker(&mut state, &marker(1, 0, 7)).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_partial());
    }
}
