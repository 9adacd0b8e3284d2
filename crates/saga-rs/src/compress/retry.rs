//! Bounded retry with exponential backoff for summarizer calls.
//!
//! Transient failures (network, 429/5xx, timeouts) and malformed output are
//! both retried; when the budget is exhausted the scheduler degrades to
//! mechanical truncation instead of failing the turn.

use std::time::Duration;

/// Retry budget and backoff shape for one summarizer invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = single attempt, no retries).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier per attempt (2.0 = exponential doubling).
    pub multiplier: f64,
    /// Whether to spread delays with jitter.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with the given retry count and default backoff shape.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Total attempts this policy allows (initial call + retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the retry following `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number — enough to
            // decorrelate callers without pulling in rand.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_retries_twice() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn delays_grow_until_capped() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::with_retries(6)
        };
        let d0 = policy.delay_for_attempt(0);
        let d1 = policy.delay_for_attempt(1);
        let d5 = policy.delay_for_attempt(5);
        assert!(d1 > d0);
        assert_eq!(d5, policy.max_delay.min(d5));
        assert!(d5 <= policy.max_delay);
    }

    #[test]
    fn jitter_never_exceeds_base_delay() {
        let jittered = RetryPolicy::default();
        let flat = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        for attempt in 0..5 {
            assert!(jittered.delay_for_attempt(attempt) <= flat.delay_for_attempt(attempt));
        }
    }
}
