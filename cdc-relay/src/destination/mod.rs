//! Hand-off of relayed events to the downstream consumer.

pub mod publisher;
pub mod queue;
