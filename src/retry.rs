//! Retry policies as plain data.
//!
//! Every outbound-IO component shares this value type instead of hand-rolled
//! backoff loops. A policy says how many attempts to make and how long to
//! sleep between them; the caller owns the loop.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Ceiling for the exponential curve.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts, base_delay, max_delay }
    }

    /// RPC endpoints: 3 attempts, 500 ms doubling, capped at 8 s.
    pub const fn rpc() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(8))
    }

    /// External HTTP APIs: 3 attempts, 1 s doubling, capped at 15 s.
    pub const fn http() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(15))
    }

    /// Delay to sleep after attempt number `attempt` (0-based) fails.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// True while another attempt is within budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy::rpc();
        assert_eq!(p.delay(0), Duration::from_millis(500));
        assert_eq!(p.delay(1), Duration::from_secs(1));
        assert_eq!(p.delay(2), Duration::from_secs(2));
        assert_eq!(p.delay(3), Duration::from_secs(4));
        assert_eq!(p.delay(4), Duration::from_secs(8));
        // Capped from here on
        assert_eq!(p.delay(5), Duration::from_secs(8));
        assert_eq!(p.delay(30), Duration::from_secs(8));
    }

    #[test]
    fn test_attempt_budget() {
        let p = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        assert!(p.should_retry(0));
        assert!(p.should_retry(1));
        assert!(!p.should_retry(2));
    }
}
