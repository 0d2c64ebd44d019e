//! Delay schedule between primary delivery attempts

use std::time::Duration;

use rand::Rng;

use crate::config::{DeliveryConfig, RetryStrategy};

/// Bounded retry ladder for the primary channel
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    strategy: RetryStrategy,
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            strategy: config.retry_strategy,
            base_delay_ms: config.retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms.max(config.retry_delay_ms),
            multiplier: config.retry_multiplier.max(1.0),
            jitter_factor: config.retry_jitter.clamp(0.0, 1.0),
        }
    }

    /// Total primary attempts per delivery (always at least one)
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the `attempt`-th failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64;
        let delay = match self.strategy {
            RetryStrategy::Fixed => base,
            RetryStrategy::Exponential => {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                (base * self.multiplier.powi(exponent)).min(self.max_delay_ms as f64)
            }
        };

        if self.jitter_factor > 0.0 && delay > 0.0 {
            let jitter_range = delay * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            Duration::from_millis((delay + jitter).max(0.0) as u64)
        } else {
            Duration::from_millis(delay as u64)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}
