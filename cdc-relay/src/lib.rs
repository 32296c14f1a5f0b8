pub mod concurrency;
pub mod destination;
pub mod error;
mod macros;
pub mod metrics;
pub mod relay;
pub mod replication;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
