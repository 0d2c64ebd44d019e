//! Single-channel circuit breaker

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::CircuitBreakerMetrics;

use super::current_time_ms;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow through normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, a single trial request is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time to wait before transitioning from open to half-open (ms)
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000 // 1 minute
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

/// Circuit breaker guarding one delivery channel.
///
/// All state lives in atomics so concurrent deliveries can record outcomes
/// without locking.
pub struct CircuitBreaker {
    channel: String,
    /// Current state (0=Closed, 1=Open, 2=HalfOpen)
    state: AtomicU8,
    /// Consecutive failure count
    failure_count: AtomicU32,
    /// When the circuit last opened (ms since epoch, 0 if never)
    opened_at: AtomicI64,
    /// Set while the half-open trial call is outstanding
    trial_in_flight: AtomicBool,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(channel: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let channel = channel.into();
        CircuitBreakerMetrics::set_state(&channel, CircuitState::Closed);
        Self {
            channel,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            opened_at: AtomicI64::new(0),
            trial_in_flight: AtomicBool::new(false),
            config,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Current state. Applies the Open -> HalfOpen timeout but never claims the trial call.
    pub fn state(&self) -> CircuitState {
        self.check_state_transition();
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check if a call may go through.
    ///
    /// In the half-open state only the first caller gets `true`; everyone else
    /// is rejected until the trial outcome is recorded.
    pub fn is_available(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .trial_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Closed);
                tracing::info!(channel = %self.channel, "Circuit breaker closed after successful trial");
            }
            CircuitState::Open => {
                // Late result from a call that started before the circuit opened
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        match CircuitState::from(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures < self.config.failure_threshold {
                    return;
                }

                // Publish the open timestamp before the state so readers of Open never see a stale one
                let now = current_time_ms();
                let previous = self.opened_at.swap(now, Ordering::AcqRel);
                if self
                    .state
                    .compare_exchange(
                        CircuitState::Closed as u8,
                        CircuitState::Open as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    let _ = self.opened_at.compare_exchange(
                        now,
                        previous,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                } else {
                    CircuitBreakerMetrics::set_state(&self.channel, CircuitState::Open);
                    CircuitBreakerMetrics::record_opened(&self.channel);
                    tracing::warn!(
                        channel = %self.channel,
                        failures = failures,
                        "Circuit breaker opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.failure_count.fetch_add(1, Ordering::AcqRel);
                self.transition_to(CircuitState::Open);
                CircuitBreakerMetrics::record_opened(&self.channel);
                tracing::warn!(channel = %self.channel, "Circuit breaker reopened after failed trial");
            }
            CircuitState::Open => {
                self.failure_count.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Check if we should transition from Open to HalfOpen
    fn check_state_transition(&self) {
        if CircuitState::from(self.state.load(Ordering::Acquire)) != CircuitState::Open {
            return;
        }

        let opened_at = self.opened_at.load(Ordering::Acquire);
        if opened_at == 0 {
            return;
        }

        let elapsed = current_time_ms() - opened_at;
        if elapsed >= self.config.reset_timeout_ms as i64
            && self
                .state
                .compare_exchange(
                    CircuitState::Open as u8,
                    CircuitState::HalfOpen as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.trial_in_flight.store(false, Ordering::Release);
            CircuitBreakerMetrics::set_state(&self.channel, CircuitState::HalfOpen);
            tracing::info!(channel = %self.channel, "Circuit breaker transitioning to half-open state");
        }
    }

    fn transition_to(&self, new_state: CircuitState) {
        match new_state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
                self.opened_at.store(0, Ordering::Release);
            }
            CircuitState::Open => {
                self.opened_at.store(current_time_ms(), Ordering::Release);
            }
            CircuitState::HalfOpen => {}
        }
        self.trial_in_flight.store(false, Ordering::Release);
        self.state.store(new_state as u8, Ordering::Release);
        CircuitBreakerMetrics::set_state(&self.channel, new_state);
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let opened_at = match self.opened_at.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        };
        CircuitBreakerSnapshot {
            channel: self.channel.clone(),
            state: self.state(),
            consecutive_failures: self.failure_count.load(Ordering::Acquire),
            opened_at,
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub channel: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
}
