//! Retry configuration with bounded attempts and configurable backoff.
//!
//! Fetch stages retry transient network failures a bounded number of times
//! with linear backoff; permanent failures (404s, checksum mismatches) are
//! never retried.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// delay = base * (attempt + 1)
    #[default]
    Linear,
    /// delay = base * 2^attempt
    Exponential,
    /// delay = base (constant)
    Constant,
}

/// Jitter applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter; delays are fully deterministic.
    #[default]
    None,
    /// Random from 0 to the computed delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the initial one.
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_strategy: BackoffStrategy::Linear,
            jitter_strategy: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// State tracking for one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Current attempt number (0-indexed).
    pub attempt: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the attempt counter and returns true if more attempts remain.
    pub fn increment(&mut self, config: &RetryConfig) -> bool {
        self.attempt += 1;
        self.attempt < config.max_attempts
    }

    /// Calculates the delay before the next attempt.
    #[must_use]
    pub fn calculate_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        #[allow(clippy::cast_possible_truncation)]
        let raw = match config.backoff_strategy {
            BackoffStrategy::Linear => base.saturating_mul(self.attempt as u64 + 1),
            BackoffStrategy::Exponential => {
                base.saturating_mul(1u64.checked_shl(self.attempt as u32).unwrap_or(u64::MAX))
            }
            BackoffStrategy::Constant => base,
        };
        let capped = raw.min(config.max_delay_ms);

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => capped,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=capped),
            JitterStrategy::Equal => capped / 2 + rand::thread_rng().gen_range(0..=capped / 2),
        };

        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_grows_with_attempts() {
        let config = RetryConfig::new().with_base_delay_ms(100);
        let mut state = RetryState::new();

        assert_eq!(state.calculate_delay(&config), Duration::from_millis(100));
        state.increment(&config);
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(200));
        state.increment(&config);
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 4000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::None,
        };
        let state = RetryState { attempt: 6 };
        assert_eq!(state.calculate_delay(&config), Duration::from_millis(4000));
    }

    #[test]
    fn increment_respects_the_attempt_bound() {
        let config = RetryConfig::new().with_max_attempts(3);
        let mut state = RetryState::new();

        assert!(state.increment(&config)); // attempt 1 -> more remain
        assert!(state.increment(&config)); // attempt 2 -> more remain
        assert!(!state.increment(&config)); // attempt 3 -> exhausted
    }

    #[test]
    fn full_jitter_stays_within_the_computed_delay() {
        let config = RetryConfig::new()
            .with_base_delay_ms(500)
            .with_jitter(JitterStrategy::Full);
        let state = RetryState::new();

        for _ in 0..20 {
            assert!(state.calculate_delay(&config) <= Duration::from_millis(500));
        }
    }
}
