//! Durable storage of partition positions.

pub mod base;
pub mod file;
pub mod memory;
pub mod null;

pub use base::CheckpointStore;
