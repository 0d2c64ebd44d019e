//! Per-channel circuit breakers for delivery channels.
//!
//! Each channel name gets its own [`CircuitBreaker`], created lazily on first
//! use and kept for the lifetime of the process.

mod breaker;

use std::sync::Arc;

use dashmap::DashMap;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Registry of circuit breakers keyed by channel name
pub struct CircuitBreakers {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker for a channel
    pub fn get(&self, channel: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(channel) {
            return breaker.clone();
        }
        self.breakers
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(channel, self.config.clone())))
            .clone()
    }

    pub fn is_available(&self, channel: &str) -> bool {
        self.get(channel).is_available()
    }

    pub fn record_success(&self, channel: &str) {
        self.get(channel).record_success();
    }

    pub fn record_failure(&self, channel: &str) {
        self.get(channel).record_failure();
    }

    pub fn state(&self, channel: &str) -> CircuitState {
        self.get(channel).state()
    }

    /// Snapshots of every known breaker, sorted by channel name
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.channel.cmp(&b.channel));
        snapshots
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakers_are_independent_per_channel() {
        let breakers = CircuitBreakers::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
        });

        breakers.record_failure("redis");
        breakers.record_failure("redis");
        breakers.record_failure("sse");

        assert_eq!(breakers.state("redis"), CircuitState::Open);
        assert_eq!(breakers.state("sse"), CircuitState::Closed);
        assert!(!breakers.is_available("redis"));
        assert!(breakers.is_available("sse"));
    }

    #[test]
    fn test_get_returns_shared_instance() {
        let breakers = CircuitBreakers::default();
        let a = breakers.get("redis");
        let b = breakers.get("redis");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_snapshots_sorted() {
        let breakers = CircuitBreakers::default();
        breakers.get("sse");
        breakers.get("redis");

        let names: Vec<_> = breakers.snapshots().into_iter().map(|s| s.channel).collect();
        assert_eq!(names, vec!["redis".to_string(), "sse".to_string()]);
    }
}
