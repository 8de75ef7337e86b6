//! Per-key exponential backoff with jitter.
//!
//! After a failed pass a key is held back for a delay that grows with each
//! consecutive failure. Jitter spreads retries of keys that failed together.

use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::BackoffConfig;
use crate::store::ResourceKey;

/// Backoff timing.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
}

/// Backoff state of every failing key.
#[derive(Debug)]
pub struct BackoffTracker {
    policy: BackoffPolicy,
    entries: HashMap<ResourceKey, BackoffEntry>,
}

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    failures: u32,
    retry_at: Instant,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_ms),
            max_delay: Duration::from_secs(config.max_secs),
            multiplier: config.multiplier,
        }
    }
}

impl BackoffPolicy {
    /// Returns the un-jittered delay after `failures` consecutive failures.
    #[must_use]
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Returns the jittered delay: 0.5x to 1.5x of the base, capped at the max.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let secs = self.base_delay(failures).as_secs_f64() * jitter;
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

impl BackoffTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Returns true if `key` may be reconciled at `now`.
    #[must_use]
    pub fn is_ready(&self, key: &ResourceKey, now: Instant) -> bool {
        self.entries.get(key).is_none_or(|e| now >= e.retry_at)
    }

    /// Records a failed pass and returns how long the key is held back.
    ///
    /// Errors that cannot succeed on retry wait the maximum delay.
    pub fn record_failure(&mut self, key: &ResourceKey, retryable: bool, now: Instant) -> Duration {
        let entry = self.entries.entry(key.clone()).or_insert(BackoffEntry {
            failures: 0,
            retry_at: now,
        });
        entry.failures = entry.failures.saturating_add(1);

        let delay = if retryable {
            self.policy.delay(entry.failures)
        } else {
            self.policy.max_delay
        };
        entry.retry_at = now + delay;
        delay
    }

    /// Clears the backoff of a key after a successful pass.
    pub fn record_success(&mut self, key: &ResourceKey) {
        self.entries.remove(key);
    }

    /// Returns the number of consecutive failures of `key`.
    #[must_use]
    pub fn failures(&self, key: &ResourceKey) -> u32 {
        self.entries.get(key).map_or(0, |e| e.failures)
    }

    /// Forgets keys that are no longer in the store.
    pub fn retain_keys(&mut self, live: &[ResourceKey]) {
        self.entries.retain(|k, _| live.contains(k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(10), Duration::from_secs(1));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = policy();
        for _ in 0..100 {
            let delay = policy.delay(2);
            assert!(delay >= Duration::from_millis(99));
            assert!(delay <= Duration::from_millis(301));
        }
    }

    #[test]
    fn test_tracker_holds_back_failed_key() {
        let mut tracker = BackoffTracker::new(policy());
        let key = ResourceKey::parse("alice");
        let now = Instant::now();

        assert!(tracker.is_ready(&key, now));
        let delay = tracker.record_failure(&key, true, now);
        assert!(!tracker.is_ready(&key, now));
        assert!(tracker.is_ready(&key, now + delay));
        assert_eq!(tracker.failures(&key), 1);

        tracker.record_success(&key);
        assert!(tracker.is_ready(&key, now));
        assert_eq!(tracker.failures(&key), 0);
    }

    #[test]
    fn test_non_retryable_waits_max() {
        let mut tracker = BackoffTracker::new(policy());
        let key = ResourceKey::parse("alice");
        let delay = tracker.record_failure(&key, false, Instant::now());
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn test_retain_keys() {
        let mut tracker = BackoffTracker::new(policy());
        let alice = ResourceKey::parse("alice");
        let bob = ResourceKey::parse("bob");
        let now = Instant::now();
        tracker.record_failure(&alice, true, now);
        tracker.record_failure(&bob, true, now);

        tracker.retain_keys(std::slice::from_ref(&alice));
        assert_eq!(tracker.failures(&alice), 1);
        assert_eq!(tracker.failures(&bob), 0);
    }
}
