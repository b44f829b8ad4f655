//! Retry policy: decides how often and how long to back off for one ledger call.

use std::time::Duration;

/// Retry policy for a single outbound ledger call.
///
/// The next scan cycle already retries any session left unsynced, so the
/// default makes exactly one attempt. Raising `max_attempts` adds bounded
/// in-call retries for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call (including the first one).
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }

    /// Delay before the next attempt: `base_delay * multiplier^(attempts - 1)`,
    /// capped at `max_delay`.
    ///
    /// Example with base_delay=200ms, multiplier=2.0, max_delay=2s:
    /// - attempt 1 failed: 200ms
    /// - attempt 2 failed: 400ms
    /// - attempt 5 failed: 2s (capped)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_makes_a_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.allows_retry(1));
    }

    #[test]
    fn zero_attempts_still_allows_the_first_call() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(policy.allows_retry(0));
        assert!(!policy.allows_retry(1));
    }

    #[test]
    fn exponential_backoff_increases_until_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2), Duration::from_millis(400));
        assert_eq!(policy.next_delay(3), Duration::from_millis(800));
        assert_eq!(policy.next_delay(5), Duration::from_secs(2));
        assert_eq!(policy.next_delay(60), Duration::from_secs(2));
        assert!(policy.allows_retry(4));
        assert!(!policy.allows_retry(5));
    }
}
