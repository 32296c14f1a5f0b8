//! Replay positions of the relayed partitions.
//!
//! [`position::PartitionPosition`] is the per-partition replay cursor and
//! [`stream::StreamState`] the authoritative, change-notifying collection of those cursors for
//! the duration of a run.

pub mod position;
pub mod stream;
