//! Exponential backoff with full jitter.
//!
//! One policy covers task dispatch, compensation dispatch, planner calls and
//! webhook delivery; callers tune the attempt budget.

use rand::Rng;
use std::time::Duration;

const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total attempt budget, including the first try.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    /// Deterministic upper bound for the given attempt: min(base * 2^n, cap).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }

    /// Full-jitter delay: uniform in [0, ceiling(attempt)].
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Tracker for one retried operation.
    pub fn state(&self) -> RetryState {
        RetryState {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryState {
    policy: BackoffPolicy,
    attempt: u32,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record an attempt; `Some(delay)` while budget remains for another try
    /// after this one, `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.delay(self.attempt - 1))
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }
}
