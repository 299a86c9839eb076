//! Per-key exponential backoff for the work queue.
//!
//! Every failure of a key doubles its next retry delay, starting at `base`
//! and capped at `max`. Forgetting a key resets its history, so a key that
//! recovers is not delayed by earlier failures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Tracks consecutive failures per key.
#[derive(Debug)]
pub struct ItemBackoff {
    failures: Mutex<HashMap<String, u32>>,
    base: Duration,
    max: Duration,
}

impl ItemBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            base,
            max,
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().expect("backoff lock");
        let count = failures.entry(key.to_string()).or_insert(0);
        let exponent = *count;
        *count += 1;

        // 2^31 * base already saturates any realistic cap.
        let factor = 1u32 << exponent.min(31);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Number of times `key` has been requeued since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        let failures = self.failures.lock().expect("backoff lock");
        failures.get(key).copied().unwrap_or(0)
    }

    /// Clear the failure history of `key`.
    pub fn forget(&self, key: &str) {
        let mut failures = self.failures.lock().expect("backoff lock");
        failures.remove(key);
    }
}

impl Default for ItemBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_failure() {
        let backoff = ItemBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        assert_eq!(backoff.when("a"), Duration::from_millis(5));
        assert_eq!(backoff.when("a"), Duration::from_millis(10));
        assert_eq!(backoff.when("a"), Duration::from_millis(20));
        assert_eq!(backoff.num_requeues("a"), 3);
    }

    #[test]
    fn keys_are_independent() {
        let backoff = ItemBackoff::default();
        backoff.when("a");
        backoff.when("a");

        assert_eq!(backoff.when("b"), Duration::from_millis(5));
        assert_eq!(backoff.num_requeues("b"), 1);
        assert_eq!(backoff.num_requeues("c"), 0);
    }

    #[test]
    fn delay_caps_at_max() {
        let backoff = ItemBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..10 {
            backoff.when("a");
        }
        // 1 → 2 → 4 → ... → 512, capped at 60.
        assert_eq!(backoff.when("a"), Duration::from_secs(60));
    }

    #[test]
    fn huge_failure_count_does_not_overflow() {
        let backoff = ItemBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
        for _ in 0..100 {
            backoff.when("a");
        }
        assert_eq!(backoff.when("a"), Duration::from_secs(1000));
    }

    #[test]
    fn forget_resets_history() {
        let backoff = ItemBackoff::default();
        backoff.when("a");
        backoff.when("a");

        backoff.forget("a");
        assert_eq!(backoff.num_requeues("a"), 0);
        assert_eq!(backoff.when("a"), Duration::from_millis(5));
    }
}
