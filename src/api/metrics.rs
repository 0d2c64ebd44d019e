//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics::{self, CircuitBreakerMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_gauges_from_state(&state).await;

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Gauges are sampled at scrape time
async fn update_gauges_from_state(state: &AppState) {
    metrics::CONNECTIONS_ACTIVE.set(state.registry.connection_count() as i64);

    let store = state.event_store.stats().await;
    metrics::EVENTS_RETAINED.set(store.retained_events as i64);

    for snapshot in state.breakers.snapshots() {
        CircuitBreakerMetrics::set_state(&snapshot.channel, snapshot.state);
    }
}
