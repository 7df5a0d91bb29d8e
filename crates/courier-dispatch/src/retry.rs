//! Retry backoff policy for exhausted candidate lists.
//!
//! A message that ran out of candidates without a terminal outcome is
//! re-enqueued after an exponential backoff. Retries re-enter the selector,
//! so the next round may route through a different adapter.

use std::time::Duration;

use rand::Rng;

/// What to do after a dispatch round failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Re-enqueue after the given delay.
    Retry {
        /// Backoff to wait before the next round.
        delay: Duration,
    },
    /// Give up and mark the message failed.
    Exhausted,
}

/// Exponential backoff with full jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum re-dispatch rounds after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each round.
    pub base_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
    /// Fraction of the delay randomised away, in `[0, 1]`. `1.0` is full
    /// jitter (uniform over `(0, delay]`); `0.0` disables jitter for
    /// deterministic tests.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_factor: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, for tests that assert exact delays.
    pub fn deterministic() -> Self {
        Self { jitter_factor: 0.0, ..Self::default() }
    }

    /// Decides the next step given how many retries the message has already
    /// consumed.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if retry_count >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry { delay: self.delay_for(retry_count + 1) }
    }

    /// Backoff for the `retry`-th retry (1-based): `base * 2^(retry-1)`,
    /// capped, with up to `jitter_factor` of it randomised away.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1 << exponent);
        let capped = raw.min(self.max_delay);

        if self.jitter_factor <= 0.0 {
            return capped;
        }
        let keep = 1.0 - self.jitter_factor * rand::rng().random_range(0.0..1.0);
        Duration::from_secs_f64(capped.as_secs_f64() * keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_cap() {
        let policy = RetryPolicy::deterministic();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(20), Duration::from_secs(60));
    }

    #[test]
    fn exhausts_after_max_retries() {
        let policy = RetryPolicy::deterministic();
        assert_eq!(policy.decide(0), RetryDecision::Retry { delay: Duration::from_secs(2) });
        assert_eq!(policy.decide(2), RetryDecision::Retry { delay: Duration::from_secs(8) });
        assert_eq!(policy.decide(3), RetryDecision::Exhausted);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(3);
            assert!(delay <= Duration::from_secs(8));
        }
    }
}
