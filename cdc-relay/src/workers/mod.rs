pub mod base;
pub mod checkpoint;
