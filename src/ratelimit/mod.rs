//! Admission decisions: sliding window and token bucket limiters.

mod clock;
mod decision;
mod rules;
mod sliding_window;
mod token_bucket;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use decision::Decision;
pub use rules::{KeyRule, RuleSet};
pub use sliding_window::{SlidingWindowLimiter, WindowConfig};
pub use token_bucket::TokenBucketLimiter;
