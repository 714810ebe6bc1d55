//! Session configuration

use std::time::Duration;

use autotrader_core::Market;

/// Retry schedule with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next try after `attempt` (1-based) failed:
    /// base, 2x base, 4x base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// Tunables for one daily session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub market: Market,
    /// Sleep between poll passes
    pub poll_interval: Duration,
    /// Sleep after a failed pass before trying again
    pub error_backoff: Duration,
    /// Retry schedule for position fetches at session start
    pub position_fetch_retry: RetryPolicy,
    /// When set, a safety-guard block aborts the session instead of
    /// skipping the order
    pub hard_fail_on_guard_block: bool,
}

impl SessionConfig {
    pub fn new(market: Market) -> Self {
        Self {
            market,
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            position_fetch_retry: RetryPolicy::default(),
            hard_fail_on_guard_block: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }
}
