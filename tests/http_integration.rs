//! HTTP surface tests
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`; no
//! listener, Redis or network is involved.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use futures::StreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use notification_delivery_service::auth::Claims;
use notification_delivery_service::config::{
    ApiConfig, CircuitBreakerConfig, DeliveryConfig, EventStoreConfig, JwtConfig, OtelConfig,
    ProfileLimits, RateLimitConfig, RedisConfig, ServerConfig, Settings, SseConfig,
};
use notification_delivery_service::delivery::UnconfiguredChannel;
use notification_delivery_service::server::{create_app, AppState};

const JWT_SECRET: &str = "integration-test-secret";
const API_KEY: &str = "test-key";

fn test_settings(rate_limit: RateLimitConfig) -> Settings {
    Settings {
        server: ServerConfig::default(),
        jwt: JwtConfig {
            secret: JWT_SECRET.to_string(),
            issuer: None,
            audience: None,
        },
        api: ApiConfig {
            key: Some(API_KEY.to_string()),
        },
        redis: RedisConfig::default(),
        delivery: DeliveryConfig::default(),
        circuit_breaker: CircuitBreakerConfig::default(),
        sse: SseConfig {
            heartbeat_interval: 0,
            ..SseConfig::default()
        },
        event_store: EventStoreConfig::default(),
        rate_limit,
        otel: OtelConfig::default(),
    }
}

fn test_app(rate_limit: RateLimitConfig) -> (Router, AppState) {
    let (state, _worker) = AppState::new(test_settings(rate_limit), Arc::new(UnconfiguredChannel));
    (create_app(state.clone()), state)
}

fn token_for(recipient_id: &str) -> String {
    encode(
        &Header::default(),
        &Claims::new(recipient_id, 3600),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
}

#[tokio::test]
async fn test_liveness() {
    let (app, _) = test_app(RateLimitConfig::default());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_stream_requires_token() {
    let (app, _) = test_app(RateLimitConfig::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_stream_opens_with_connection_established() {
    let (app, state) = test_app(RateLimitConfig::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/notifications/stream?token={}", token_for("user-1")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(state.registry.connection_count(), 1);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: connection_established"));
    assert!(text.contains("user-1"));

    // Dropping the body ends the stream and unregisters the connection
    drop(body);
    assert_eq!(state.registry.connection_count(), 0);
}

#[tokio::test]
async fn test_stream_replays_after_last_event_id() {
    let (app, state) = test_app(RateLimitConfig::default());
    for n in 1..=3 {
        state.event_store.append("user-1", json!({ "n": n })).await.unwrap();
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications/stream")
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("user-1")))
                .header("Last-Event-ID", "1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let mut text = String::new();
    while !text.contains("id: 3") {
        let chunk = body.next().await.unwrap().unwrap();
        text.push_str(&String::from_utf8(chunk.to_vec()).unwrap());
    }

    assert!(text.contains("event: connection_established"));
    assert!(text.contains("id: 2"));
    assert!(!text.contains("id: 1\n"));
}

#[tokio::test]
async fn test_replay_endpoint() {
    let (app, state) = test_app(RateLimitConfig::default());
    for n in 1..=8 {
        state.event_store.append("user-1", json!({ "n": n })).await.unwrap();
    }

    let body = json!({ "lastEventId": 5, "maxEvents": 10 });
    let response = app
        .oneshot(
            post_json("/api/v1/notifications/replay")
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("user-1")))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let ids: Vec<u64> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["eventId"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![6, 7, 8]);
    assert_eq!(body["totalEvents"], 3);
    assert_eq!(body["hasMore"], false);
    assert_eq!(body["lastEventId"], 8);
    assert_eq!(body["gapDetected"], false);
}

#[tokio::test]
async fn test_heartbeat_ack_for_unknown_connection() {
    let (app, _) = test_app(RateLimitConfig::default());

    let body = json!({ "connectionId": uuid::Uuid::new_v4().to_string(), "response": "pong" });
    let response = app
        .oneshot(
            post_json("/api/v1/notifications/heartbeat")
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("user-1")))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn test_admin_endpoints_require_api_key() {
    let (app, _) = test_app(RateLimitConfig::default());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications/stats")
                .header("X-API-Key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("X-RateLimit-Remaining"));

    let body = body_json(response).await;
    assert_eq!(body["delivery"]["totalSent"], 0);
    assert_eq!(body["connections"]["totalConnections"], 0);
}

#[tokio::test]
async fn test_delivery_health_reports_degraded_without_primary() {
    let (app, _) = test_app(RateLimitConfig::default());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/notifications/health")
                .header("X-API-Key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["primaryConfigured"], false);
}

#[tokio::test]
async fn test_replay_is_rate_limited() {
    let (app, _) = test_app(RateLimitConfig {
        default_profile: ProfileLimits {
            burst: 1,
            requests_per_minute: 1,
        },
        ..RateLimitConfig::default()
    });

    let request = || {
        post_json("/api/v1/notifications/replay")
            .header(header::AUTHORIZATION, format!("Bearer {}", token_for("user-1")))
            .body(Body::from("{}"))
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("Retry-After"));
    assert_eq!(body_json(second).await["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_rejected_api_keys_share_the_admin_bucket() {
    let (app, state) = test_app(RateLimitConfig {
        admin_profile: ProfileLimits {
            burst: 2,
            requests_per_minute: 1,
        },
        ..RateLimitConfig::default()
    });

    let stats = |key: &str| {
        Request::builder()
            .uri("/api/v1/notifications/stats")
            .header("X-API-Key", key)
            .body(Body::empty())
            .unwrap()
    };

    for guess in ["guess-1", "guess-2"] {
        let response = app.clone().oneshot(stats(guess)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // A fresh guess does not get a fresh bucket
    let third = app.clone().oneshot(stats("guess-3")).await.unwrap();
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);

    let valid = app.oneshot(stats(API_KEY)).await.unwrap();
    assert_eq!(valid.status(), StatusCode::TOO_MANY_REQUESTS);

    // No bucket is keyed by a submitted key
    assert_eq!(state.limiter.stats().admin_buckets, 1);
}

#[tokio::test]
async fn test_send_without_connections_is_unavailable() {
    let (app, _) = test_app(RateLimitConfig::default());

    let body = json!({
        "userId": "user-1",
        "notification": {"id": "n1", "type": "system", "title": "Hi", "message": "x", "priority": "high"}
    });
    let response = app
        .oneshot(
            post_json("/api/v1/notifications/send")
                .header("X-API-Key", API_KEY)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["method"], "fallback");
    assert_eq!(body["errorCode"], "NO_ACTIVE_CONNECTIONS");
}

#[tokio::test]
async fn test_send_to_connected_recipient_uses_fallback() {
    let (app, state) = test_app(RateLimitConfig::default());
    let mut stream = state.registry.connect("user-1").unwrap();

    let body = json!({
        "userId": "user-1",
        "notification": {"id": "n1", "type": "system", "title": "Hi", "message": "x"}
    });
    let response = app
        .oneshot(
            post_json("/api/v1/notifications/send")
                .header("X-API-Key", API_KEY)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["fallbackUsed"], true);

    let frame = stream.receiver.recv().await.unwrap();
    assert_eq!(frame.id, Some(1));
    assert_eq!(frame.data["id"], "n1");
}

#[tokio::test]
async fn test_send_with_empty_user_is_bad_request() {
    let (app, _) = test_app(RateLimitConfig::default());

    let body = json!({
        "userId": "  ",
        "notification": {"id": "n1", "type": "system", "title": "Hi", "message": "x"}
    });
    let response = app
        .oneshot(
            post_json("/api/v1/notifications/send")
                .header("X-API-Key", API_KEY)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "INVALID_USER_ID");
}

#[tokio::test]
async fn test_async_send_is_accepted() {
    let (app, _) = test_app(RateLimitConfig::default());

    let body = json!({
        "userId": "user-1",
        "notification": {"id": "n1", "type": "system", "title": "Hi", "message": "x"}
    });
    let response = app
        .oneshot(
            post_json("/api/v1/notifications/send?mode=async")
                .header("X-API-Key", API_KEY)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["notificationId"], "n1");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = test_app(RateLimitConfig::default());

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("notify_connections_active"));
}
