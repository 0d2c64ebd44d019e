//! Persistent notification stream over Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::connection_manager::{ConnectionError, ConnectionRegistry, ConnectionStream};
use crate::error::AppError;
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::server::{AppState, AuthenticatedRecipient};

use super::StreamFrame;

/// Query parameters for the stream endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub token: Option<String>,
    pub last_event_id: Option<u64>,
}

/// `GET /api/v1/notifications/stream`
///
/// Emits `connection_established`, then `replay_gap` if events after the
/// client's `Last-Event-ID` were evicted, then every retained event after
/// that cursor, then the live stream.
#[tracing::instrument(name = "sse.connect", skip_all, fields(recipient_id = %recipient_id))]
pub async fn stream_handler(
    State(state): State<AppState>,
    AuthenticatedRecipient(recipient_id): AuthenticatedRecipient,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let last_event_id = extract_last_event_id(&query, &headers);

    // Register before reading the replay so nothing appended in between is lost
    let connection = state.registry.connect(&recipient_id).map_err(|e| match e {
        ConnectionError::InvalidRecipient => AppError::Auth(e.to_string()),
        ConnectionError::TotalLimitExceeded { .. } => AppError::ConnectionLimit(e.to_string()),
    })?;

    let catch_up = match last_event_id {
        Some(cursor) => {
            let page_size = state.settings.event_store.max_replay_limit;
            match catch_up(state.event_store.as_ref(), &recipient_id, cursor, page_size).await {
                Ok(catch_up) => {
                    tracing::info!(
                        connection_id = %connection.connection_id,
                        last_event_id = cursor,
                        replayed = catch_up.events.len(),
                        gap_detected = catch_up.gap.is_some(),
                        "Replaying missed events on connect"
                    );
                    catch_up
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Replay on connect failed, continuing with live stream");
                    CatchUp::default()
                }
            }
        }
        None => CatchUp::default(),
    };

    let established = StreamFrame::connection_established(
        connection.connection_id,
        &recipient_id,
        state.settings.sse.heartbeat_interval,
    );

    let frames = create_frame_stream(connection, established, catch_up, state.registry.clone());
    let events = frames.map(|frame| Ok::<Event, Infallible>(frame.to_sse_event()));
    Ok(Sse::new(events).into_response())
}

/// Everything a reconnecting client missed
#[derive(Debug, Default)]
struct CatchUp {
    events: Vec<StoredEvent>,
    /// Present when events after the cursor were evicted before the client returned
    gap: Option<StreamFrame>,
}

/// Read every retained event after `cursor`, `page_size` at a time
async fn catch_up(
    store: &dyn EventStore,
    recipient_id: &str,
    cursor: u64,
    page_size: usize,
) -> Result<CatchUp, EventStoreError> {
    let page_size = page_size.max(1);
    let mut events: Vec<StoredEvent> = Vec::new();
    let mut gap_detected = false;
    let mut next = cursor;

    loop {
        let page = store.replay(recipient_id, Some(next), page_size).await?;
        gap_detected |= page.gap_detected;
        let advanced = page.new_last_event_id != next;
        next = page.new_last_event_id;
        events.extend(page.events);
        if !page.has_more || !advanced {
            break;
        }
    }

    let gap = gap_detected
        .then(|| StreamFrame::replay_gap(cursor, events.first().map(|e| e.event_id)));
    Ok(CatchUp { events, gap })
}

/// `Last-Event-ID` header first, then the `lastEventId` query parameter
fn extract_last_event_id(query: &StreamQuery, headers: &HeaderMap) -> Option<u64> {
    headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(query.last_event_id)
}

fn create_frame_stream(
    connection: ConnectionStream,
    established: StreamFrame,
    catch_up: CatchUp,
    registry: Arc<ConnectionRegistry>,
) -> impl Stream<Item = StreamFrame> {
    let guard = CleanupGuard {
        connection_id: connection.connection_id,
        registry,
    };
    let mut live = ReceiverStream::new(connection.receiver);

    async_stream::stream! {
        // Dropped when the client goes away or the registry closes the queue
        let _guard = guard;

        yield established;
        if let Some(gap) = catch_up.gap {
            yield gap;
        }

        let mut replayed_up_to = 0u64;
        for event in catch_up.events {
            replayed_up_to = event.event_id;
            yield StreamFrame::notification(event.event_id, event.payload);
        }

        while let Some(frame) = live.next().await {
            // Already sent during replay
            if frame.is_notification() && frame.id.is_some_and(|id| id <= replayed_up_to) {
                continue;
            }
            yield frame;
        }
    }
}

/// Unregisters the connection when the stream ends
struct CleanupGuard {
    connection_id: Uuid,
    registry: Arc<ConnectionRegistry>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.registry.disconnect(self.connection_id) {
            tracing::info!(connection_id = %self.connection_id, "Stream closed by client");
        }
    }
}
