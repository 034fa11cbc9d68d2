//! Retry policy: decides backoff delays and when to give up.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Retry policy for failed deliveries.
///
/// Exponential backoff without jitter: the n-th failure (1-indexed) waits
/// `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Failures allowed before the item is permanently failed.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Whether an item that has failed `retry_count` times gets another attempt.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before the next attempt after `retry_count` failures.
    ///
    /// Example with base_delay=5s:
    /// - 1st failure: 5s
    /// - 2nd failure: 10s
    /// - 3rd failure: 20s
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// `now + next_delay(retry_count)`, clamped to the latest representable instant.
    pub fn next_retry_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        TimeDelta::from_std(self.next_delay(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy::new(Duration::from_secs(2), 5);

        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
        assert_eq!(policy.next_delay(4), Duration::from_secs(16));
    }

    #[test]
    fn zero_failures_uses_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), policy.base_delay);
    }

    #[test]
    fn next_retry_at_is_strictly_increasing_below_the_ceiling() {
        let policy = RetryPolicy::new(Duration::from_millis(1500), 20);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut previous = now;
        for k in 1..policy.max_retries {
            let at = policy.next_retry_at(now, k);
            assert!(at - now > previous - now, "k={k}");
            previous = at;
        }
    }

    #[test]
    fn huge_retry_counts_saturate() {
        let policy = RetryPolicy::new(Duration::from_secs(5), u32::MAX);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(policy.next_delay(40), Duration::MAX);
        assert_eq!(policy.next_retry_at(now, 40), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn gives_up_at_max_retries() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
