use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::error::AppError;
use crate::ratelimit::{EndpointClass, RateLimitResult};

/// API Key authentication middleware
/// Validates X-API-Key header against configured api.key
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // If no API key is configured, allow all requests (development mode)
    let Some(expected_key) = &state.settings.api.key else {
        return next.run(req).await;
    };

    let api_key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());

    match api_key {
        Some(key) if key == expected_key => next.run(req).await,
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            AppError::Auth("Invalid API key".to_string()).into_response()
        }
        None => {
            tracing::warn!("Missing API key header");
            AppError::Auth("Missing API key".to_string()).into_response()
        }
    }
}

/// Client address, or "unknown" when the server was not started with connect info
fn client_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Stream connections are admitted per client IP
pub async fn connect_admission(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = client_ip(&req);
    admit(&state, EndpointClass::Connect, key, req, next).await
}

/// Replay and heartbeat acknowledgments are admitted per client IP
pub async fn replay_admission(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = client_ip(&req);
    admit(&state, EndpointClass::Replay, key, req, next).await
}

/// Admin and producer endpoints use the higher-throughput admin profile.
///
/// Runs ahead of the API key check and is keyed by client IP, so rejected
/// keys draw from the same bucket as accepted ones.
pub async fn admin_admission(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = client_ip(&req);
    admit(&state, EndpointClass::Admin, key, req, next).await
}

async fn admit(
    state: &AppState,
    class: EndpointClass,
    key: String,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(req).await;
    }

    match state.limiter.check(&key, class) {
        RateLimitResult::Allowed { remaining, limit } => {
            let mut response = next.run(req).await;

            let headers = response.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
                headers.insert("X-RateLimit-Limit", v);
            }
            if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
                headers.insert("X-RateLimit-Remaining", v);
            }

            response
        }
        RateLimitResult::Denied { retry_after, limit } => {
            tracing::warn!(
                client = %key,
                class = class.as_str(),
                retry_after = retry_after,
                "Rate limit exceeded"
            );
            AppError::RateLimited { retry_after, limit }.into_response()
        }
    }
}
