//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::circuit_breaker::CircuitState;

use super::{
    CIRCUIT_BREAKER_OPENED_TOTAL, CIRCUIT_BREAKER_STATE, CIRCUIT_OPEN_SKIPS_TOTAL,
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL, CONNECTION_DURATION,
    DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, DELIVERY_LATENCY, EVENTS_EVICTED_TOTAL,
    EVENTS_RETAINED, EVENTS_STORED_TOTAL, FALLBACKS_USED_TOTAL, HEARTBEATS_SENT_TOTAL,
    HEARTBEAT_ACKS_TOTAL, INTAKE_ABANDONED_TOTAL, PRIMARY_ATTEMPTS_TOTAL, RATELIMIT_ALLOWED_TOTAL,
    RATELIMIT_DENIED_TOTAL, REPLAYED_EVENTS_TOTAL, REPLAY_GAPS_TOTAL, REPLAY_REQUESTS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_success(method: &str, latency_secs: f64) {
        DELIVERIES_TOTAL.with_label_values(&[method, "success"]).inc();
        DELIVERY_LATENCY.with_label_values(&[method]).observe(latency_secs);
    }

    pub fn record_failure(method: &str, code: &str) {
        DELIVERIES_TOTAL.with_label_values(&[method, "failure"]).inc();
        DELIVERY_FAILURES_TOTAL.with_label_values(&[code]).inc();
    }

    pub fn record_fallback_used() {
        FALLBACKS_USED_TOTAL.inc();
    }

    pub fn record_primary_attempt(success: bool) {
        let outcome = if success { "success" } else { "failure" };
        PRIMARY_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn record_circuit_open_skip() {
        CIRCUIT_OPEN_SKIPS_TOTAL.inc();
    }

    pub fn record_intake_abandoned(count: u64) {
        INTAKE_ABANDONED_TOTAL.inc_by(count);
    }
}

/// Helper struct for circuit breaker metrics
pub struct CircuitBreakerMetrics;

impl CircuitBreakerMetrics {
    pub fn set_state(channel: &str, state: CircuitState) {
        CIRCUIT_BREAKER_STATE
            .with_label_values(&[channel])
            .set(state as i64);
    }

    pub fn record_opened(channel: &str) {
        CIRCUIT_BREAKER_OPENED_TOTAL.with_label_values(&[channel]).inc();
    }
}

/// Helper struct for connection metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_closed(reason: &str, duration_secs: f64) {
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
        CONNECTIONS_ACTIVE.dec();
        CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_heartbeat_sent() {
        HEARTBEATS_SENT_TOTAL.inc();
    }

    pub fn record_heartbeat_ack() {
        HEARTBEAT_ACKS_TOTAL.inc();
    }
}

/// Helper struct for event store and replay metrics
pub struct EventStoreMetrics;

impl EventStoreMetrics {
    pub fn record_stored() {
        EVENTS_STORED_TOTAL.inc();
        EVENTS_RETAINED.inc();
    }

    pub fn record_evicted(reason: &str, count: u64) {
        if count == 0 {
            return;
        }
        EVENTS_EVICTED_TOTAL.with_label_values(&[reason]).inc_by(count);
        EVENTS_RETAINED.sub(count as i64);
    }

    pub fn record_replay(returned: usize, gap_detected: bool) {
        REPLAY_REQUESTS_TOTAL.inc();
        REPLAYED_EVENTS_TOTAL.inc_by(returned as u64);
        if gap_detected {
            REPLAY_GAPS_TOTAL.inc();
        }
    }
}

/// Helper struct for recording admission limiter metrics
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn record_allowed(profile: &str, class: &str) {
        RATELIMIT_ALLOWED_TOTAL.with_label_values(&[profile, class]).inc();
    }

    pub fn record_denied(profile: &str, class: &str) {
        RATELIMIT_DENIED_TOTAL.with_label_values(&[profile, class]).inc();
    }
}
