//! Retry policy
//!
//! Bounded exponential backoff with jitter, shared by the aggregator's
//! compare-and-swap loop, the delivery handlers and the forwarder.

use std::time::Duration;

use rand::Rng;

/// Upper bound for a single backoff sleep
const MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (always at least 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Single attempt, no sleeping
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Whether another attempt is allowed after `attempt` (0-based) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// `delay_for(attempt)` with its upper half randomized, so concurrent
    /// losers of the same conflict spread out.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let half = delay / 2;
        let spread = half.as_micros() as u64;
        if spread == 0 {
            return delay;
        }
        half + Duration::from_micros(rand::thread_rng().gen_range(0..=spread))
    }

    pub async fn backoff(&self, attempt: u32) {
        let delay = self.jittered_delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(50));
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(30), MAX_DELAY);
    }

    #[test]
    fn test_jittered_delay_stays_in_upper_half() {
        let policy = RetryPolicy::new(10, Duration::from_millis(50));
        for attempt in [0, 1, 3, 30] {
            let full = policy.delay_for(attempt);
            for _ in 0..100 {
                let delay = policy.jittered_delay(attempt);
                assert!(delay >= full / 2, "{:?} below {:?}", delay, full / 2);
                assert!(delay <= full, "{:?} above {:?}", delay, full);
            }
        }
    }

    #[test]
    fn test_jittered_delay_varies() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        let delays: std::collections::HashSet<Duration> =
            (0..50).map(|_| policy.jittered_delay(2)).collect();
        assert!(delays.len() > 1);
    }

    #[test]
    fn test_zero_base_never_sleeps() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert_eq!(policy.jittered_delay(0), Duration::ZERO);
        assert_eq!(policy.jittered_delay(5), Duration::ZERO);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.should_retry(0));
    }
}
