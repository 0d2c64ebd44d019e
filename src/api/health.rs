//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::circuit_breaker::CircuitBreakerSnapshot;
use crate::connection_manager::ConnectionStats;
use crate::delivery::{DeliveryHealth, DeliveryStatsSnapshot};
use crate::event_store::EventStoreStats;
use crate::ratelimit::RateLimiterStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health - process liveness, no dependencies checked
pub async fn health(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub delivery: DeliveryStatsSnapshot,
    pub connections: ConnectionStats,
    pub event_store: EventStoreStats,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub rate_limit: RateLimiterStats,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

/// GET /api/v1/notifications/stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        delivery: state.orchestrator.metrics(),
        connections: state.registry.stats(),
        event_store: state.event_store.stats().await,
        circuit_breakers: state.breakers.snapshots(),
        rate_limit: state.limiter.stats(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryHealthResponse {
    /// `healthy` when the primary channel is usable, `degraded` when only fallback is
    pub status: String,
    #[serde(flatten)]
    pub delivery: DeliveryHealth,
    pub active_connections: usize,
    pub connected_recipients: usize,
}

/// GET /api/v1/notifications/health
pub async fn delivery_health(State(state): State<AppState>) -> Json<DeliveryHealthResponse> {
    let delivery = state.orchestrator.health_status().await;
    let connections = state.registry.stats();

    let status = if delivery.primary_healthy {
        "healthy"
    } else if delivery.fallback_healthy {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(DeliveryHealthResponse {
        status: status.to_string(),
        delivery,
        active_connections: connections.total_connections,
        connected_recipients: connections.unique_recipients,
    })
}
