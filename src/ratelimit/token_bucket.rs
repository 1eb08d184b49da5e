//! Token bucket rate limiter.
//!
//! The bucket starts full and every admitted request takes one token. Once
//! the refill interval has elapsed since the last refill, the next request
//! resets the balance to full capacity. Refills are all-or-nothing; there is
//! no proportional top-up between intervals.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::{Clock, MonotonicClock};
use super::decision::Decision;
use crate::error::{Result, WardenError};

/// A single token bucket shared by all of its callers.
///
/// The balance and the last refill time are atomics so that reads on the
/// common path never take the lock. Every state transition (consuming a
/// token, refilling) happens under the bucket's mutex.
#[derive(Debug)]
pub struct TokenBucketLimiter<C: Clock = MonotonicClock> {
    /// Maximum number of tokens, restored on every refill
    capacity: u32,
    /// Minimum time between refills
    refill_interval: Duration,
    /// Current balance
    tokens: AtomicU32,
    /// Clock reading of the last refill, in nanoseconds
    last_refill: AtomicU64,
    /// Serializes consumption and refill
    lock: Mutex<()>,
    clock: C,
}

impl TokenBucketLimiter<MonotonicClock> {
    /// Create a full bucket backed by the monotonic system clock.
    pub fn new(capacity: u32, refill_interval: Duration) -> Result<Self> {
        Self::with_clock(capacity, refill_interval, MonotonicClock::new())
    }
}

impl<C: Clock> TokenBucketLimiter<C> {
    /// Create a full bucket that reads time from `clock`.
    pub fn with_clock(capacity: u32, refill_interval: Duration, clock: C) -> Result<Self> {
        if capacity == 0 {
            return Err(WardenError::InvalidConfig(
                "token bucket capacity must be positive".to_string(),
            ));
        }
        if refill_interval.is_zero() {
            return Err(WardenError::InvalidConfig(
                "token bucket refill interval must be positive".to_string(),
            ));
        }

        let now = as_nanos(clock.now());
        Ok(Self {
            capacity,
            refill_interval,
            tokens: AtomicU32::new(capacity),
            last_refill: AtomicU64::new(now),
            lock: Mutex::new(()),
            clock,
        })
    }

    /// Try to take one token.
    ///
    /// Refills the bucket first if the refill interval has elapsed.
    pub fn try_consume(&self) -> Decision {
        self.refill();

        let _guard = self.lock.lock();
        let tokens = self.tokens.load(Ordering::Acquire);
        if tokens == 0 {
            trace!(capacity = self.capacity, "Token bucket empty, rejecting");
            return Decision::Reject;
        }

        self.tokens.store(tokens - 1, Ordering::Release);
        trace!(remaining = tokens - 1, "Token consumed");
        Decision::Allow
    }

    /// Current balance. Does not trigger a refill, so the value may be stale.
    pub fn available_tokens(&self) -> u32 {
        self.tokens.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Reset the balance to capacity if a full interval has elapsed.
    fn refill(&self) {
        let interval = as_nanos(self.refill_interval);

        let now = as_nanos(self.clock.now());
        if now.saturating_sub(self.last_refill.load(Ordering::Acquire)) < interval {
            return;
        }

        let _guard = self.lock.lock();

        // Another caller may have refilled while we waited for the lock
        let now = as_nanos(self.clock.now());
        let last_refill = self.last_refill.load(Ordering::Acquire);
        if now.saturating_sub(last_refill) < interval {
            return;
        }

        self.last_refill.store(now, Ordering::Release);
        self.tokens.store(self.capacity, Ordering::Release);

        debug!(
            capacity = self.capacity,
            refilled_at_secs = Duration::from_nanos(now).as_secs_f64(),
            "Token bucket refilled"
        );
    }
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
