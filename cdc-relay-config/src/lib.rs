//! Configuration management for the CDC relay.
//!
//! Provides environment detection, configuration loading from YAML files and shared
//! configuration types for the relay and its stream driver.

mod environment;
mod load;
pub mod shared;

pub use environment::*;
pub use load::*;
