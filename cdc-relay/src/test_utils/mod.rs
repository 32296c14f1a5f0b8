pub mod cluster;
pub mod event;
pub mod store;
