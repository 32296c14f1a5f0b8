mod base;
mod relay;
mod retry;

pub use base::*;
pub use relay::*;
pub use retry::*;
