//! Admission control for chat requests.

mod counter;
mod limiter;

pub use counter::{InMemoryCounterStore, RateCounterStore, RateWindow};
pub use limiter::RateLimiter;
