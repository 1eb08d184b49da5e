//! Sliding window rate limiter keyed by client identity or route.
//!
//! Each key carries its own [`WindowConfig`] and a ledger of admitted request
//! counts bucketed by timestamp (whole seconds). A decision evicts buckets
//! that fell out of the window, sums the survivors and admits the request
//! only if that sum is below the key's limit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::decision::Decision;
use super::rules::RuleSet;
use crate::error::{Result, WardenError};

/// Window length and admission budget for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Length of the sliding window in seconds
    pub window_seconds: u32,
    /// Maximum admitted requests within the window
    pub limit: u32,
}

impl WindowConfig {
    /// Create a validated window configuration.
    ///
    /// Both values must be positive.
    pub fn new(window_seconds: u32, limit: u32) -> Result<Self> {
        if window_seconds == 0 {
            return Err(WardenError::InvalidConfig(
                "window size must be a positive number of seconds".to_string(),
            ));
        }
        if limit == 0 {
            return Err(WardenError::InvalidConfig(
                "limit must be a positive number of requests".to_string(),
            ));
        }
        Ok(Self {
            window_seconds,
            limit,
        })
    }
}

/// Admitted request counts for a single key, ordered by timestamp.
#[derive(Debug, Default)]
struct Ledger {
    entries: BTreeMap<i64, u64>,
}

impl Ledger {
    /// Drop every bucket strictly older than `start`.
    fn evict_before(&mut self, start: i64) {
        self.entries = self.entries.split_off(&start);
    }

    fn usage(&self) -> u64 {
        self.entries.values().sum()
    }

    fn record(&mut self, timestamp: i64) {
        *self.entries.entry(timestamp).or_insert(0) += 1;
    }
}

/// Per-key sliding window rate limiter.
///
/// This struct is thread-safe and can be shared across threads. Evaluations
/// of the same key are serialized by that key's ledger lock; evaluations of
/// different keys proceed independently.
///
/// Ledgers are created on first evaluation and never removed, so the number
/// of tracked keys grows with the number of distinct keys seen.
#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    /// Window configuration indexed by key
    configs: DashMap<String, WindowConfig>,
    /// Admission ledgers indexed by key
    ledgers: DashMap<String, Arc<Mutex<Ledger>>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with no configured keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the configuration for `key`.
    ///
    /// Fails with [`WardenError::InvalidConfig`] if either value is zero, in
    /// which case any previous configuration for the key is kept.
    pub fn configure(&self, key: &str, window_seconds: u32, limit: u32) -> Result<()> {
        let config = WindowConfig::new(window_seconds, limit)?;
        self.configure_with(key, config);
        Ok(())
    }

    /// Set or replace the configuration for `key` from an already validated config.
    pub fn configure_with(&self, key: &str, config: WindowConfig) {
        info!(
            key = %key,
            window_seconds = config.window_seconds,
            limit = config.limit,
            "Configured sliding window"
        );
        self.configs.insert(key.to_string(), config);
    }

    /// Configure every rule in `rules`.
    ///
    /// All rules are validated first; nothing is applied if any rule is invalid.
    /// Returns the number of rules applied.
    pub fn apply_rules(&self, rules: &RuleSet) -> Result<usize> {
        let configs = rules.window_configs()?;
        let applied = configs.len();
        for (key, config) in configs {
            self.configure_with(&key, config);
        }
        Ok(applied)
    }

    /// Get the configuration for `key`, if any.
    pub fn config(&self, key: &str) -> Option<WindowConfig> {
        self.configs.get(key).map(|config| *config)
    }

    /// Decide whether a request for `key` arriving at `now` (seconds) is admitted.
    ///
    /// Keys without a configuration are always rejected. Every evaluation of a
    /// configured key evicts expired buckets, including evaluations that end
    /// in a rejection. A bucket whose timestamp equals `now - window_seconds`
    /// is still inside the window.
    pub fn decide(&self, key: &str, now: i64) -> Decision {
        let Some(config) = self.config(key) else {
            debug!(key = %key, "No sliding window configured for key, rejecting");
            return Decision::Reject;
        };

        let start = now.saturating_sub(i64::from(config.window_seconds));
        let ledger = self.ledger(key);
        let mut ledger = ledger.lock();

        ledger.evict_before(start);
        let usage = ledger.usage();

        trace!(
            key = %key,
            now = now,
            window_start = start,
            usage = usage,
            limit = config.limit,
            "Evaluating sliding window"
        );

        if usage >= u64::from(config.limit) {
            debug!(
                key = %key,
                usage = usage,
                limit = config.limit,
                "Sliding window limit exceeded"
            );
            return Decision::Reject;
        }

        ledger.record(now);
        Decision::Allow
    }

    /// Snapshot of admitted requests per key as of each key's last evaluation.
    ///
    /// Buckets are not re-evicted here, so a key that has not been evaluated
    /// recently may report requests that have since left its window.
    pub fn current_usage(&self) -> HashMap<String, u64> {
        let ledgers: Vec<(String, Arc<Mutex<Ledger>>)> = self
            .ledgers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        ledgers
            .into_iter()
            .map(|(key, ledger)| {
                let usage = ledger.lock().usage();
                (key, usage)
            })
            .collect()
    }

    /// Snapshot of admitted requests for one key, or `None` if it was never evaluated.
    pub fn usage(&self, key: &str) -> Option<u64> {
        let ledger = self.ledgers.get(key).map(|entry| Arc::clone(entry.value()))?;
        let usage = ledger.lock().usage();
        Some(usage)
    }

    /// Number of keys with a ledger.
    pub fn tracked_keys(&self) -> usize {
        self.ledgers.len()
    }

    /// Fetch or lazily create the ledger for `key`.
    ///
    /// The map guard is released before the caller locks the ledger.
    fn ledger(&self, key: &str) -> Arc<Mutex<Ledger>> {
        if let Some(entry) = self.ledgers.get(key) {
            return Arc::clone(entry.value());
        }

        let entry = self.ledgers.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating sliding window ledger");
            Arc::default()
        });
        Arc::clone(entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::KeyRule;

    const T0: i64 = 1_700_000_000;

    fn limiter_with(key: &str, window_seconds: u32, limit: u32) -> SlidingWindowLimiter {
        let limiter = SlidingWindowLimiter::new();
        limiter.configure(key, window_seconds, limit).unwrap();
        limiter
    }

    #[test]
    fn test_limit_rejects_next_request() {
        let limiter = limiter_with("u1", 10, 3);

        for offset in 0..3 {
            assert_eq!(limiter.decide("u1", T0 + offset), Decision::Allow);
        }

        // The 4th request inside the window should be rejected
        assert_eq!(limiter.decide("u1", T0 + 5), Decision::Reject);
        assert_eq!(limiter.usage("u1"), Some(3));
    }

    #[test]
    fn test_example_scenario() {
        let limiter = limiter_with("u1", 60, 5);

        for _ in 0..5 {
            assert_eq!(limiter.decide("u1", T0), Decision::Allow);
        }
        assert_eq!(limiter.decide("u1", T0), Decision::Reject);
        assert_eq!(limiter.decide("u1", T0 + 61), Decision::Allow);
    }

    #[test]
    fn test_old_requests_evicted_after_window() {
        let limiter = limiter_with("u1", 60, 3);

        assert!(limiter.decide("u1", T0).is_allowed());

        for _ in 0..3 {
            assert!(limiter.decide("u1", T0 + 61).is_allowed());
        }
        assert!(limiter.decide("u1", T0 + 61).is_rejected());
        assert_eq!(limiter.usage("u1"), Some(3));
    }

    #[test]
    fn test_entry_at_window_start_still_counts() {
        let limiter = limiter_with("u1", 60, 1);

        assert!(limiter.decide("u1", T0).is_allowed());

        // T0 == now - window: still inside the window
        assert!(limiter.decide("u1", T0 + 60).is_rejected());

        // One second later it has been evicted
        assert!(limiter.decide("u1", T0 + 61).is_allowed());
    }

    #[test]
    fn test_unconfigured_key_always_rejected() {
        let limiter = limiter_with("known", 60, 100);

        for now in [i64::MIN, -1, 0, T0, i64::MAX] {
            assert_eq!(limiter.decide("unknown", now), Decision::Reject);
        }

        // Fail-closed evaluations do not create ledgers
        assert_eq!(limiter.tracked_keys(), 0);
        assert_eq!(limiter.usage("unknown"), None);
    }

    #[test]
    fn test_rejection_still_evicts() {
        let limiter = limiter_with("u1", 10, 2);

        assert!(limiter.decide("u1", T0).is_allowed());
        assert!(limiter.decide("u1", T0 + 5).is_allowed());
        assert!(limiter.decide("u1", T0 + 9).is_rejected());

        // T0 falls out of the window, freeing a single slot
        assert!(limiter.decide("u1", T0 + 11).is_allowed());
        assert!(limiter.decide("u1", T0 + 12).is_rejected());
        assert_eq!(limiter.usage("u1"), Some(2));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let limiter = SlidingWindowLimiter::new();

        assert!(matches!(
            limiter.configure("u1", 0, 5),
            Err(WardenError::InvalidConfig(_))
        ));
        assert!(matches!(
            limiter.configure("u1", 60, 0),
            Err(WardenError::InvalidConfig(_))
        ));
        assert_eq!(limiter.config("u1"), None);
    }

    #[test]
    fn test_invalid_reconfigure_keeps_previous_config() {
        let limiter = limiter_with("u1", 60, 5);

        assert!(limiter.configure("u1", 0, 10).is_err());
        assert_eq!(limiter.config("u1"), Some(WindowConfig::new(60, 5).unwrap()));
    }

    #[test]
    fn test_reconfigure_replaces_limit() {
        let limiter = limiter_with("u1", 60, 1);

        assert!(limiter.decide("u1", T0).is_allowed());
        assert!(limiter.decide("u1", T0).is_rejected());

        limiter.configure("u1", 60, 2).unwrap();
        assert!(limiter.decide("u1", T0).is_allowed());
        assert!(limiter.decide("u1", T0).is_rejected());
    }

    #[test]
    fn test_keys_have_separate_ledgers() {
        let limiter = SlidingWindowLimiter::new();
        limiter.configure("a", 60, 2).unwrap();
        limiter.configure("b", 60, 2).unwrap();

        assert!(limiter.decide("a", T0).is_allowed());
        assert!(limiter.decide("a", T0).is_allowed());
        assert!(limiter.decide("a", T0).is_rejected());
        assert!(limiter.decide("b", T0).is_allowed());

        let usage = limiter.current_usage();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage["a"], 2);
        assert_eq!(usage["b"], 1);
    }

    #[test]
    fn test_current_usage_is_not_re_evicted() {
        let limiter = limiter_with("u1", 10, 5);

        limiter.decide("u1", T0);
        limiter.decide("u1", T0 + 1);

        // No evaluation has happened since, so the snapshot still holds both
        assert_eq!(limiter.current_usage()["u1"], 2);
    }

    #[test]
    fn test_apply_rules() {
        let limiter = SlidingWindowLimiter::new();
        let rules = RuleSet {
            rules: vec![
                KeyRule {
                    key: "a".to_string(),
                    window_seconds: 60,
                    limit: 5,
                },
                KeyRule {
                    key: "b".to_string(),
                    window_seconds: 1,
                    limit: 1,
                },
            ],
        };

        assert_eq!(limiter.apply_rules(&rules).unwrap(), 2);
        assert_eq!(limiter.config("a").unwrap().limit, 5);
        assert_eq!(limiter.config("b").unwrap().window_seconds, 1);
    }

    #[test]
    fn test_apply_rules_is_all_or_nothing() {
        let limiter = SlidingWindowLimiter::new();
        let rules = RuleSet {
            rules: vec![
                KeyRule {
                    key: "good".to_string(),
                    window_seconds: 60,
                    limit: 5,
                },
                KeyRule {
                    key: "bad".to_string(),
                    window_seconds: 60,
                    limit: 0,
                },
            ],
        };

        assert!(limiter.apply_rules(&rules).is_err());
        assert_eq!(limiter.config("good"), None);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        const THREADS: usize = 8;
        const ATTEMPTS: usize = 50;
        const LIMIT: u32 = 100;

        let limiter = limiter_with("shared", 60, LIMIT);

        let admitted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        (0..ATTEMPTS)
                            .filter(|_| limiter.decide("shared", T0).is_allowed())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, (THREADS * ATTEMPTS).min(LIMIT as usize));
        assert_eq!(limiter.usage("shared"), Some(u64::from(LIMIT)));
    }

    #[test]
    fn test_concurrent_admissions_below_limit_all_pass() {
        const THREADS: usize = 4;
        const ATTEMPTS: usize = 10;

        let limiter = limiter_with("shared", 60, 1000);

        let admitted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        (0..ATTEMPTS)
                            .filter(|_| limiter.decide("shared", T0).is_allowed())
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, THREADS * ATTEMPTS);
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let limiter = SlidingWindowLimiter::new();
        let keys: Vec<String> = (0..16).map(|i| format!("client-{}", i)).collect();
        for key in &keys {
            limiter.configure(key, 60, 3).unwrap();
        }

        std::thread::scope(|s| {
            for key in &keys {
                let limiter = &limiter;
                s.spawn(move || {
                    for _ in 0..10 {
                        limiter.decide(key, T0);
                    }
                });
            }
        });

        let usage = limiter.current_usage();
        assert_eq!(usage.len(), keys.len());
        assert!(usage.values().all(|&count| count == 3));
    }
}
