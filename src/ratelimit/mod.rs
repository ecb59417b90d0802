//! Rate limiting strategies and their common contract.

mod backend;
mod clock;
mod fixed_window;
mod keyed;
mod limiter;
mod sliding_log;
mod token_bucket;

pub use backend::{RateLimiter, Strategy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fixed_window::FixedWindowLimiter;
pub use keyed::KeyedTokenBucketLimiter;
pub use limiter::{build_limiter, LimiterConfig};
pub use sliding_log::SlidingWindowLogLimiter;
pub use token_bucket::TokenBucketLimiter;
