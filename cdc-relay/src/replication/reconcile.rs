use tracing::{debug, info};

use crate::error::RelayResult;
use crate::state::stream::{StreamState, UpdateKind};
use crate::types::{FailoverLogEntry, PartitionId, PartitionPosition};

/// Returns the failover entry with the highest sequence number.
///
/// The first of several entries sharing the highest sequence number wins.
pub fn most_recent_entry(failover_log: &[FailoverLogEntry]) -> Option<FailoverLogEntry> {
    let mut most_recent: Option<FailoverLogEntry> = None;
    for entry in failover_log {
        match most_recent {
            Some(current) if entry.sequence_number <= current.sequence_number => {}
            _ => most_recent = Some(*entry),
        }
    }

    most_recent
}

/// Computes the position replay has to resume from given the partition's failover log.
///
/// Without entries `initial` is returned unchanged. Otherwise the epoch and start sequence come
/// from the most recent entry, everything else is kept from `initial`.
pub fn reconcile_position(
    initial: PartitionPosition,
    failover_log: &[FailoverLogEntry],
) -> PartitionPosition {
    let Some(entry) = most_recent_entry(failover_log) else {
        return initial;
    };

    PartitionPosition {
        epoch: entry.epoch,
        start_sequence: entry.sequence_number,
        ..initial
    }
}

/// Reconciles the position of `partition` in `state` against its failover log.
///
/// The corrected position is written silently: it is not checkpointed until the partition makes
/// real progress.
pub fn apply_failover_log(
    state: &mut StreamState,
    partition: PartitionId,
    failover_log: &[FailoverLogEntry],
) -> RelayResult<PartitionPosition> {
    let initial = state.get(partition)?;
    let reconciled = reconcile_position(initial, failover_log);

    if reconciled != initial {
        info!(
            partition,
            from = %initial,
            to = %reconciled,
            "resume position corrected by failover log"
        );
    } else {
        debug!(partition, position = %initial, "resume position confirmed");
    }

    state.set(partition, reconciled, UpdateKind::Silent)?;

    Ok(reconciled)
}
