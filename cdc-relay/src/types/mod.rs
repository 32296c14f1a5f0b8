mod event;

pub use event::*;
pub use crate::state::position::{FailoverLogEntry, PartitionId, PartitionPosition, SEQUENCE_UNBOUNDED};
