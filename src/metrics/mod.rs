//! Prometheus metrics for the delivery service.
//!
//! - Delivery metrics (per method outcome, fallbacks, failure codes, latency)
//! - Circuit breaker state per channel
//! - Connection metrics (active, opened, closed by reason, heartbeats)
//! - Event store and replay metrics
//! - Admission limiter metrics

mod helpers;

pub use helpers::{
    encode_metrics, CircuitBreakerMetrics, ConnectionMetrics, DeliveryMetrics, EventStoreMetrics,
    RateLimitMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "notify";

lazy_static! {
    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Deliveries by method and outcome
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total deliveries by method and outcome",
        &["method", "outcome"]
    ).unwrap();

    /// Deliveries that had to use the fallback channel
    pub static ref FALLBACKS_USED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_fallbacks_used_total", METRIC_PREFIX),
        "Total deliveries routed through the fallback channel"
    ).unwrap();

    /// Failed deliveries by error code
    pub static ref DELIVERY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Total failed deliveries by error code",
        &["code"]
    ).unwrap();

    /// Individual primary channel attempts
    pub static ref PRIMARY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_primary_attempts_total", METRIC_PREFIX),
        "Total primary channel publish attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Deliveries that skipped the primary channel because its circuit was open
    pub static ref CIRCUIT_OPEN_SKIPS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_circuit_open_skips_total", METRIC_PREFIX),
        "Total deliveries that skipped the primary channel due to an open circuit"
    ).unwrap();

    /// Queued requests dropped because shutdown cut the drain short
    pub static ref INTAKE_ABANDONED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_intake_abandoned_total", METRIC_PREFIX),
        "Total queued delivery requests abandoned at shutdown"
    ).unwrap();

    /// End-to-end delivery latency
    pub static ref DELIVERY_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_delivery_latency_seconds", METRIC_PREFIX),
        "Delivery latency in seconds by final method",
        &["method"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Circuit Breaker Metrics
    // ============================================================================

    /// Circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref CIRCUIT_BREAKER_STATE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_circuit_breaker_state", METRIC_PREFIX),
        "Circuit breaker state per channel (0=closed, 1=open, 2=half-open)",
        &["channel"]
    ).unwrap();

    /// Times a circuit opened
    pub static ref CIRCUIT_BREAKER_OPENED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_circuit_breaker_opened_total", METRIC_PREFIX),
        "Total transitions into the open state per channel",
        &["channel"]
    ).unwrap();

    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Live stream connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of live stream connections"
    ).unwrap();

    /// Stream connections opened
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total stream connections opened"
    ).unwrap();

    /// Stream connections closed by reason
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total stream connections closed by reason",
        &["reason"]
    ).unwrap();

    /// Connection lifetime
    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Stream connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0, 86400.0]
    ).unwrap();

    /// Heartbeat frames written
    pub static ref HEARTBEATS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeats_sent_total", METRIC_PREFIX),
        "Total heartbeat frames written to connections"
    ).unwrap();

    /// Heartbeat acknowledgments received
    pub static ref HEARTBEAT_ACKS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_heartbeat_acks_total", METRIC_PREFIX),
        "Total heartbeat acknowledgments received"
    ).unwrap();

    // ============================================================================
    // Event Store Metrics
    // ============================================================================

    /// Events appended to the replay store
    pub static ref EVENTS_STORED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_stored_total", METRIC_PREFIX),
        "Total events appended to the replay store"
    ).unwrap();

    /// Events evicted from the replay store
    pub static ref EVENTS_EVICTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_evicted_total", METRIC_PREFIX),
        "Total events evicted from the replay store by reason",
        &["reason"]
    ).unwrap();

    /// Events currently retained
    pub static ref EVENTS_RETAINED: IntGauge = register_int_gauge!(
        format!("{}_events_retained", METRIC_PREFIX),
        "Number of events currently retained for replay"
    ).unwrap();

    /// Replay requests served
    pub static ref REPLAY_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_replay_requests_total", METRIC_PREFIX),
        "Total replay requests served"
    ).unwrap();

    /// Events returned by replay
    pub static ref REPLAYED_EVENTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_replayed_events_total", METRIC_PREFIX),
        "Total events returned by replay requests"
    ).unwrap();

    /// Replays that detected a gap
    pub static ref REPLAY_GAPS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_replay_gaps_total", METRIC_PREFIX),
        "Total replay requests whose cursor predates retained events"
    ).unwrap();

    // ============================================================================
    // Rate Limiting Metrics
    // ============================================================================

    /// Requests allowed by the admission limiter
    pub static ref RATELIMIT_ALLOWED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_allowed_total", METRIC_PREFIX),
        "Total requests allowed by the admission limiter",
        &["profile", "class"]
    ).unwrap();

    /// Requests denied by the admission limiter
    pub static ref RATELIMIT_DENIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Total requests denied by the admission limiter",
        &["profile", "class"]
    ).unwrap();
}
