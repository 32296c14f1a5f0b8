//! Tracing setup for the CDC relay.

mod tracing;

pub use crate::tracing::*;
