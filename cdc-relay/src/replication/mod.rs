//! Replication stream handling.
//!
//! Contains the boundary to the storage cluster, the reconciliation of resume positions
//! against failover logs and the tracking of snapshot boundaries.

pub mod client;
pub mod reconcile;
pub mod snapshot;
