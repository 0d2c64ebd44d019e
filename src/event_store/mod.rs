//! Bounded per-recipient event log used for Last-Event-ID replay.
//!
//! Every delivered notification is appended here before the delivery result
//! is returned, so a client that saw a success can always replay the event
//! (until it is evicted by the count cap or TTL).
//!
//! Event IDs are a per-recipient sequence starting at 1. The sequence is never
//! reset while the process lives, even when all of a recipient's events have
//! been evicted.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryEventStore;

/// An event retained for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub event_id: u64,
    pub recipient_id: String,
    pub payload: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

/// Outcome of a replay request
#[derive(Debug, Clone, Default)]
pub struct ReplayResult {
    /// Events after the cursor, oldest first
    pub events: Vec<StoredEvent>,
    /// More events exist after the last returned one
    pub has_more: bool,
    /// Cursor the client should use for its next request
    pub new_last_event_id: u64,
    /// Events between the cursor and the oldest returned event may have been lost
    pub gap_detected: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStoreStats {
    pub recipients: usize,
    pub retained_events: usize,
    pub max_events_per_recipient: usize,
    pub ttl_seconds: u64,
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("Event store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for replayable events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a payload for a recipient and return the stored event with its new ID
    async fn append(
        &self,
        recipient_id: &str,
        payload: serde_json::Value,
    ) -> Result<StoredEvent, EventStoreError>;

    /// Events with `event_id > last_event_id`, oldest first, at most `max_events`.
    ///
    /// `None` means the client has no cursor and wants everything retained.
    async fn replay(
        &self,
        recipient_id: &str,
        last_event_id: Option<u64>,
        max_events: usize,
    ) -> Result<ReplayResult, EventStoreError>;

    /// Drop events older than the retention TTL. Returns the number removed.
    async fn cleanup_expired(&self) -> usize;

    async fn stats(&self) -> EventStoreStats;
}
