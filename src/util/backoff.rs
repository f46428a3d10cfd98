//! Capped exponential backoff with an explicit, resettable attempt counter

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Ceiling for any single delay
    pub max: Duration,
    /// Retry budget per disconnect episode; None retries forever
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(10),
            max_attempts: Some(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Delay before the next attempt, or None once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempts.min(16));
        let delay = self.policy.base.saturating_mul(factor).min(self.policy.max);
        self.attempts += 1;
        Some(delay)
    }

    pub fn is_exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .map_or(false, |max| self.attempts >= max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            max_attempts,
        }
    }

    #[test]
    fn test_delays_double_then_cap() {
        let mut backoff = Backoff::new(policy(None));
        let delays: Vec<u64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_budget_is_enforced() {
        let mut backoff = Backoff::new(policy(Some(2)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::new(policy(Some(3)));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_unbounded_retries_do_not_overflow() {
        let mut backoff = Backoff::new(policy(None));
        for _ in 0..100 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_millis(1000));
        }
    }
}
