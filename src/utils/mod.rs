pub mod constants;
pub mod timeout;

pub use constants::*;
pub use timeout::with_call_timeout;
