use std::fmt;

use serde::{Deserialize, Serialize};

/// Sequence number used as `end_sequence` of a partition that should be replayed forever.
pub const SEQUENCE_UNBOUNDED: u64 = u64::MAX;

/// Index of a partition of the replication stream.
pub type PartitionId = u16;

/// Replay cursor of a single partition.
///
/// Positions are plain values. Every change produces a new position that is written back into
/// the [`crate::state::stream::StreamState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionPosition {
    /// Failover lineage the position belongs to.
    pub epoch: u64,
    /// Sequence number from which replay resumes, inclusive.
    pub start_sequence: u64,
    /// Sequence number at which replay stops, [`SEQUENCE_UNBOUNDED`] for never.
    pub end_sequence: u64,
    /// Start of the most recently entered snapshot.
    pub snapshot_start_sequence: u64,
    /// End retained from the previously entered snapshot.
    pub snapshot_end_sequence: u64,
}

impl PartitionPosition {
    /// Creates a position that has not observed any snapshot yet.
    ///
    /// The snapshot bounds are collapsed onto `start_sequence`.
    pub fn new(epoch: u64, start_sequence: u64, end_sequence: u64) -> Self {
        Self {
            epoch,
            start_sequence,
            end_sequence,
            snapshot_start_sequence: start_sequence,
            snapshot_end_sequence: start_sequence,
        }
    }

    /// Position replaying a partition from its first sequence number without an end.
    pub fn beginning() -> Self {
        Self::new(0, 0, SEQUENCE_UNBOUNDED)
    }

    pub fn is_unbounded(&self) -> bool {
        self.end_sequence == SEQUENCE_UNBOUNDED
    }
}

impl Default for PartitionPosition {
    fn default() -> Self {
        Self::beginning()
    }
}

impl fmt::Display for PartitionPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch {} from {} to ", self.epoch, self.start_sequence)?;
        if self.is_unbounded() {
            f.write_str("unbounded")?;
        } else {
            write!(f, "{}", self.end_sequence)?;
        }
        write!(
            f,
            " (snapshot {}..{})",
            self.snapshot_start_sequence, self.snapshot_end_sequence
        )
    }
}

/// A point reported by the cluster after which a partition's history is consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailoverLogEntry {
    pub epoch: u64,
    pub sequence_number: u64,
}

impl FailoverLogEntry {
    pub fn new(epoch: u64, sequence_number: u64) -> Self {
        Self {
            epoch,
            sequence_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beginning_is_unbounded_with_collapsed_snapshot() {
        let position = PartitionPosition::beginning();

        assert_eq!(position.epoch, 0);
        assert_eq!(position.start_sequence, 0);
        assert!(position.is_unbounded());
        assert_eq!(position.snapshot_start_sequence, 0);
        assert_eq!(position.snapshot_end_sequence, 0);
    }

    #[test]
    fn positions_round_trip_through_json() {
        let position = PartitionPosition::new(7, 120, SEQUENCE_UNBOUNDED);

        let json = serde_json::to_string(&position).unwrap();
        let decoded: PartitionPosition = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, position);
    }

    #[test]
    fn display_names_unbounded_end() {
        let position = PartitionPosition::new(2, 150, SEQUENCE_UNBOUNDED);

        assert_eq!(
            position.to_string(),
            "epoch 2 from 150 to unbounded (snapshot 150..150)"
        );
    }
}
