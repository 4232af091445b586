mod filter;
pub use filter::*;

mod limiter;
pub use limiter::*;
