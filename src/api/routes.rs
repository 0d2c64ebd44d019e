use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{admin_admission, api_key_auth, connect_admission, replay_admission, AppState};
use crate::sse::stream_handler;

use super::health::{delivery_health, health, stats};
use super::metrics::prometheus_metrics;
use super::producer::{broadcast, force, send};
use super::replay::{heartbeat_ack, replay};

pub fn api_routes(state: AppState) -> Router<AppState> {
    // Client endpoints authenticate with a JWT
    let stream_routes = Router::new()
        .route("/stream", get(stream_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), connect_admission));

    let client_routes = Router::new()
        .route("/replay", post(replay))
        .route("/heartbeat", post(heartbeat_ack))
        .route_layer(middleware::from_fn_with_state(state.clone(), replay_admission));

    // Admin and producer endpoints authenticate with the API key
    let admin_routes = Router::new()
        .route("/stats", get(stats))
        .route("/health", get(delivery_health))
        .route("/send", post(send))
        .route("/broadcast", post(broadcast))
        .route("/force", post(force))
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_auth))
        .route_layer(middleware::from_fn_with_state(state, admin_admission));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1/notifications",
            stream_routes.merge(client_routes).merge(admin_routes),
        )
}
