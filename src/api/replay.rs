//! Polling replay and heartbeat acknowledgment endpoints.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::event_store::StoredEvent;
use crate::server::{AppState, AuthenticatedRecipient};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    pub last_event_id: Option<u64>,
    pub max_events: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub events: Vec<StoredEvent>,
    pub total_events: usize,
    pub has_more: bool,
    pub last_event_id: u64,
    pub gap_detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// POST /api/v1/notifications/replay
#[tracing::instrument(name = "http.replay", skip_all, fields(recipient_id = %recipient_id))]
pub async fn replay(
    State(state): State<AppState>,
    AuthenticatedRecipient(recipient_id): AuthenticatedRecipient,
    Json(request): Json<ReplayRequest>,
) -> Result<Json<ReplayResponse>> {
    let config = &state.settings.event_store;
    let max_events = clamp_max_events(
        request.max_events,
        config.default_replay_limit,
        config.max_replay_limit,
    );

    let result = state
        .event_store
        .replay(&recipient_id, request.last_event_id, max_events)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ReplayResponse {
        total_events: result.events.len(),
        events: result.events,
        has_more: result.has_more,
        last_event_id: result.new_last_event_id,
        gap_detected: result.gap_detected,
        timestamp: Utc::now(),
    }))
}

fn clamp_max_events(requested: Option<usize>, default: usize, ceiling: usize) -> usize {
    requested.unwrap_or(default).clamp(1, ceiling.max(1))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAckRequest {
    pub connection_id: String,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatAckResponse {
    pub success: bool,
}

/// POST /api/v1/notifications/heartbeat
///
/// `success` is false when the connection is gone or belongs to someone else.
pub async fn heartbeat_ack(
    State(state): State<AppState>,
    AuthenticatedRecipient(recipient_id): AuthenticatedRecipient,
    Json(request): Json<HeartbeatAckRequest>,
) -> Result<Json<HeartbeatAckResponse>> {
    let connection_id = Uuid::parse_str(&request.connection_id)
        .map_err(|_| AppError::Validation("connectionId must be a UUID".to_string()))?;

    let success = state.registry.record_heartbeat_ack(connection_id, &recipient_id);
    if !success {
        tracing::debug!(
            connection_id = %connection_id,
            recipient_id = %recipient_id,
            "Heartbeat ack for unknown connection"
        );
    }

    Ok(Json(HeartbeatAckResponse { success }))
}
