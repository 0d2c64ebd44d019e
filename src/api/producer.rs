//! Producer-facing delivery endpoints.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::delivery::{BroadcastTarget, DeliveryRequest, DeliveryResult, IntakeError, Notification};
use crate::error::{AppError, Result};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub user_id: String,
    pub notification: Notification,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default = "default_target")]
    pub target: BroadcastTarget,
    pub notification: Notification,
}

fn default_target() -> BroadcastTarget {
    BroadcastTarget::All
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceRequest {
    pub method: String,
    pub user_id: String,
    pub notification: Notification,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModeQuery {
    /// `async` hands the request to the intake queue and returns 202
    pub mode: Option<String>,
}

impl ModeQuery {
    fn is_async(&self) -> bool {
        self.mode.as_deref() == Some("async")
    }
}

/// POST /api/v1/notifications/send
#[tracing::instrument(
    name = "http.send",
    skip(state, query, request),
    fields(user_id = %request.user_id, notification_id = %request.notification.id)
)]
pub async fn send(
    State(state): State<AppState>,
    Query(query): Query<ModeQuery>,
    Json(request): Json<SendRequest>,
) -> Result<Response> {
    if query.is_async() {
        let notification_id = request.notification.id.clone();
        enqueue(
            &state,
            DeliveryRequest::Send {
                recipient_id: request.user_id,
                notification: request.notification,
            },
            notification_id,
        )
    } else {
        let result = state
            .orchestrator
            .send(&request.user_id, &request.notification)
            .await;
        into_response(result)
    }
}

/// POST /api/v1/notifications/broadcast
#[tracing::instrument(
    name = "http.broadcast",
    skip(state, query, request),
    fields(notification_id = %request.notification.id)
)]
pub async fn broadcast(
    State(state): State<AppState>,
    Query(query): Query<ModeQuery>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Response> {
    if query.is_async() {
        let notification_id = request.notification.id.clone();
        enqueue(
            &state,
            DeliveryRequest::Broadcast {
                target: request.target,
                notification: request.notification,
            },
            notification_id,
        )
    } else {
        let result = state
            .orchestrator
            .broadcast(&request.notification, &request.target)
            .await;
        into_response(result)
    }
}

/// POST /api/v1/notifications/force
#[tracing::instrument(
    name = "http.force",
    skip(state, request),
    fields(user_id = %request.user_id, method = %request.method)
)]
pub async fn force(
    State(state): State<AppState>,
    Json(request): Json<ForceRequest>,
) -> Result<Response> {
    let result = state
        .orchestrator
        .force_method(&request.method, &request.user_id, &request.notification)
        .await;
    into_response(result)
}

fn enqueue(state: &AppState, request: DeliveryRequest, notification_id: String) -> Result<Response> {
    match state.intake.try_submit(request) {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "accepted": true, "notificationId": notification_id })),
        )
            .into_response()),
        Err(IntakeError::Full) => Err(AppError::RateLimited {
            retry_after: 1,
            limit: state.settings.delivery.intake_capacity as u32,
        }),
        Err(IntakeError::Closed) => Err(AppError::Internal("delivery intake is closed".to_string())),
    }
}

/// Validation failures use the error envelope; other failures keep the full result
fn into_response(result: DeliveryResult) -> Result<Response> {
    if result.success {
        return Ok((StatusCode::OK, Json(result)).into_response());
    }

    match result.error_code {
        Some(code) if code.is_validation() => Err(AppError::Delivery {
            code,
            message: result.error.unwrap_or_else(|| code.to_string()),
        }),
        _ => Ok((StatusCode::SERVICE_UNAVAILABLE, Json(result)).into_response()),
    }
}
