//! In-memory event store using DashMap.
//!
//! Events are lost on restart. A client reconnecting to a fresh process with
//! an old cursor gets `gap_detected` instead of a silent empty replay.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;

use crate::config::EventStoreConfig;
use crate::metrics::EventStoreMetrics;

use super::{EventStore, EventStoreError, EventStoreStats, ReplayResult, StoredEvent};

/// Per-recipient ring buffer plus the sequence counter
#[derive(Debug, Default)]
struct RecipientLog {
    /// Last issued event ID (0 = none yet)
    last_id: u64,
    events: VecDeque<StoredEvent>,
}

impl RecipientLog {
    /// Remove events past the TTL from the front. Returns the number removed.
    fn purge_expired(&mut self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut removed = 0;
        while let Some(front) = self.events.front() {
            if front.stored_at <= cutoff {
                self.events.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }
}

/// In-memory implementation of [`EventStore`].
///
/// Lock order: `logs` shard, then `retired` shard.
pub struct MemoryEventStore {
    logs: DashMap<String, RecipientLog>,
    /// Last issued ID of recipients whose log emptied out and was dropped
    retired: DashMap<String, u64>,
    config: EventStoreConfig,
}

impl MemoryEventStore {
    pub fn new(config: EventStoreConfig) -> Self {
        Self {
            logs: DashMap::new(),
            retired: DashMap::new(),
            config,
        }
    }

    /// Replace empty logs with their sequence counter. Returns the number compacted.
    fn compact_empty_logs(&self) -> usize {
        let empty: Vec<String> = self
            .logs
            .iter()
            .filter(|entry| entry.events.is_empty())
            .map(|entry| entry.key().clone())
            .collect();

        empty
            .into_iter()
            .filter(|recipient_id| {
                // Checked again under the shard lock; an append may have landed meanwhile
                self.logs
                    .remove_if(recipient_id, |key, log| {
                        if log.events.is_empty() {
                            self.retired.insert(key.clone(), log.last_id);
                            true
                        } else {
                            false
                        }
                    })
                    .is_some()
            })
            .count()
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.config.ttl_seconds as i64)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        recipient_id: &str,
        payload: serde_json::Value,
    ) -> Result<StoredEvent, EventStoreError> {
        let ttl = self.ttl();
        let mut log = self.logs.entry(recipient_id.to_string()).or_insert_with(|| RecipientLog {
            last_id: self
                .retired
                .remove(recipient_id)
                .map(|(_, last_id)| last_id)
                .unwrap_or(0),
            events: VecDeque::new(),
        });

        let expired = log.purge_expired(ttl);
        EventStoreMetrics::record_evicted("ttl", expired as u64);

        log.last_id += 1;
        let event = StoredEvent {
            event_id: log.last_id,
            recipient_id: recipient_id.to_string(),
            payload,
            stored_at: Utc::now(),
        };
        log.events.push_back(event.clone());
        EventStoreMetrics::record_stored();

        let mut overflow = 0;
        while log.events.len() > self.config.max_events_per_user {
            log.events.pop_front();
            overflow += 1;
        }
        if overflow > 0 {
            EventStoreMetrics::record_evicted("capacity", overflow);
            tracing::debug!(
                recipient_id = %recipient_id,
                evicted = overflow,
                retained = log.events.len(),
                "Evicted oldest events from full replay buffer"
            );
        }

        Ok(event)
    }

    async fn replay(
        &self,
        recipient_id: &str,
        last_event_id: Option<u64>,
        max_events: usize,
    ) -> Result<ReplayResult, EventStoreError> {
        let ttl = self.ttl();
        let cursor = last_event_id.unwrap_or(0);

        let Some(mut log) = self.logs.get_mut(recipient_id) else {
            // Nothing retained. Any cursor short of the last issued ID lost events to eviction,
            // and one past it comes from an earlier process.
            let last_id = self.retired.get(recipient_id).map(|id| *id).unwrap_or(0);
            let gap_detected = last_id_mismatch(cursor, last_id);
            EventStoreMetrics::record_replay(0, gap_detected);
            return Ok(ReplayResult {
                events: Vec::new(),
                has_more: false,
                new_last_event_id: last_id,
                gap_detected,
            });
        };

        let expired = log.purge_expired(ttl);
        EventStoreMetrics::record_evicted("ttl", expired as u64);

        // A cursor ahead of anything issued means the client saw a previous incarnation
        let stale_cursor = cursor > log.last_id;
        let start_after = if stale_cursor { 0 } else { cursor };
        let first_available = log
            .events
            .front()
            .map(|e| e.event_id)
            .unwrap_or(log.last_id + 1);
        let gap_detected =
            stale_cursor || (last_event_id.is_some() && start_after + 1 < first_available);

        let mut pending = log.events.iter().filter(|e| e.event_id > start_after);
        let events: Vec<StoredEvent> = pending.by_ref().take(max_events).cloned().collect();
        let has_more = pending.next().is_some();

        let new_last_event_id = match events.last() {
            Some(event) => event.event_id,
            None if stale_cursor => log.last_id,
            None => cursor,
        };
        drop(log);

        EventStoreMetrics::record_replay(events.len(), gap_detected);
        if gap_detected {
            tracing::info!(
                recipient_id = %recipient_id,
                last_event_id = cursor,
                first_available = first_available,
                "Replay cursor predates retained events"
            );
        }

        Ok(ReplayResult {
            events,
            has_more,
            new_last_event_id,
            gap_detected,
        })
    }

    async fn cleanup_expired(&self) -> usize {
        let ttl = self.ttl();
        let mut removed = 0;

        for mut entry in self.logs.iter_mut() {
            removed += entry.value_mut().purge_expired(ttl);
        }

        EventStoreMetrics::record_evicted("ttl", removed as u64);
        let compacted = self.compact_empty_logs();
        if removed > 0 || compacted > 0 {
            tracing::info!(
                removed = removed,
                compacted = compacted,
                recipients = self.logs.len(),
                "Cleaned up expired replay events"
            );
        }

        removed
    }

    async fn stats(&self) -> EventStoreStats {
        let retained_events = self.logs.iter().map(|entry| entry.events.len()).sum();
        EventStoreStats {
            recipients: self.logs.len(),
            retained_events,
            max_events_per_recipient: self.config.max_events_per_user,
            ttl_seconds: self.config.ttl_seconds,
        }
    }
}

/// A cursor other than the last issued ID cannot be served from an empty log
fn last_id_mismatch(cursor: u64, last_id: u64) -> bool {
    cursor > 0 && cursor != last_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(max_events: usize, ttl_seconds: u64) -> MemoryEventStore {
        MemoryEventStore::new(EventStoreConfig {
            max_events_per_user: max_events,
            ttl_seconds,
            ..Default::default()
        })
    }

    async fn append_n(store: &MemoryEventStore, recipient: &str, n: usize) {
        for i in 0..n {
            store.append(recipient, json!({ "n": i })).await.unwrap();
        }
    }

    fn ids(result: &ReplayResult) -> Vec<u64> {
        result.events.iter().map(|e| e.event_id).collect()
    }

    #[tokio::test]
    async fn test_ids_are_per_recipient_sequences() {
        let store = store(100, 3600);

        assert_eq!(store.append("user-1", json!(1)).await.unwrap().event_id, 1);
        assert_eq!(store.append("user-1", json!(2)).await.unwrap().event_id, 2);
        assert_eq!(store.append("user-2", json!(3)).await.unwrap().event_id, 1);
        assert_eq!(store.append("user-1", json!(4)).await.unwrap().event_id, 3);
    }

    #[tokio::test]
    async fn test_replay_after_cursor() {
        let store = store(100, 3600);
        append_n(&store, "user-1", 8).await;

        let result = store.replay("user-1", Some(5), 10).await.unwrap();
        assert_eq!(ids(&result), vec![6, 7, 8]);
        assert!(!result.has_more);
        assert!(!result.gap_detected);
        assert_eq!(result.new_last_event_id, 8);
    }

    #[tokio::test]
    async fn test_replay_respects_max_events() {
        let store = store(100, 3600);
        append_n(&store, "user-1", 10).await;

        let first = store.replay("user-1", Some(2), 3).await.unwrap();
        assert_eq!(ids(&first), vec![3, 4, 5]);
        assert!(first.has_more);
        assert_eq!(first.new_last_event_id, 5);

        let second = store
            .replay("user-1", Some(first.new_last_event_id), 10)
            .await
            .unwrap();
        assert_eq!(ids(&second), vec![6, 7, 8, 9, 10]);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn test_replay_without_cursor_returns_everything() {
        let store = store(100, 3600);
        append_n(&store, "user-1", 3).await;

        let result = store.replay("user-1", None, 10).await.unwrap();
        assert_eq!(ids(&result), vec![1, 2, 3]);
        assert!(!result.gap_detected);
    }

    #[tokio::test]
    async fn test_up_to_date_cursor_returns_nothing() {
        let store = store(100, 3600);
        append_n(&store, "user-1", 3).await;

        let result = store.replay("user-1", Some(3), 10).await.unwrap();
        assert!(result.events.is_empty());
        assert!(!result.has_more);
        assert!(!result.gap_detected);
        assert_eq!(result.new_last_event_id, 3);
    }

    #[tokio::test]
    async fn test_capacity_eviction_signals_gap() {
        let store = store(5, 3600);
        append_n(&store, "user-1", 12).await;

        // Retained: 8..=12
        let result = store.replay("user-1", Some(3), 10).await.unwrap();
        assert_eq!(ids(&result), vec![8, 9, 10, 11, 12]);
        assert!(result.gap_detected);

        // Cursor right before the oldest retained event is seamless
        let seamless = store.replay("user-1", Some(7), 10).await.unwrap();
        assert_eq!(ids(&seamless), vec![8, 9, 10, 11, 12]);
        assert!(!seamless.gap_detected);
    }

    #[tokio::test]
    async fn test_stale_cursor_from_previous_process() {
        let store = store(100, 3600);
        append_n(&store, "user-1", 2).await;

        let result = store.replay("user-1", Some(40), 10).await.unwrap();
        assert_eq!(ids(&result), vec![1, 2]);
        assert!(result.gap_detected);

        let unknown = store.replay("nobody", Some(9), 10).await.unwrap();
        assert!(unknown.events.is_empty());
        assert!(unknown.gap_detected);

        let fresh = store.replay("nobody", None, 10).await.unwrap();
        assert!(!fresh.gap_detected);
    }

    #[tokio::test]
    async fn test_ttl_eviction_keeps_sequence() {
        // Zero TTL: every append purges its predecessors, cleanup takes the last one
        let store = store(100, 0);
        append_n(&store, "user-1", 3).await;

        assert_eq!(store.cleanup_expired().await, 1);
        assert_eq!(store.stats().await.retained_events, 0);

        // Counter survives eviction
        let next = store.append("user-1", json!("later")).await.unwrap();
        assert_eq!(next.event_id, 4);

        let result = store.replay("user-1", Some(1), 10).await.unwrap();
        assert!(result.gap_detected);
    }

    #[tokio::test]
    async fn test_cleanup_compacts_empty_logs() {
        let store = store(100, 0);
        append_n(&store, "user-1", 3).await;
        append_n(&store, "user-2", 1).await;

        store.cleanup_expired().await;
        assert_eq!(store.stats().await.recipients, 0);
        assert_eq!(store.logs.len(), 0);
        assert_eq!(store.retired.len(), 2);

        // Cursors against a compacted recipient
        let current = store.replay("user-1", Some(3), 10).await.unwrap();
        assert!(!current.gap_detected);
        assert_eq!(current.new_last_event_id, 3);
        let behind = store.replay("user-1", Some(1), 10).await.unwrap();
        assert!(behind.gap_detected);
        let ahead = store.replay("user-1", Some(9), 10).await.unwrap();
        assert!(ahead.gap_detected);

        // The sequence resumes from the retired counter
        assert_eq!(store.append("user-1", json!("later")).await.unwrap().event_id, 4);
        assert!(!store.retired.contains_key("user-1"));
        assert_eq!(store.append("user-2", json!("later")).await.unwrap().event_id, 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = store(10, 3600);
        append_n(&store, "user-1", 3).await;
        append_n(&store, "user-2", 2).await;

        let stats = store.stats().await;
        assert_eq!(stats.recipients, 2);
        assert_eq!(stats.retained_events, 5);
        assert_eq!(stats.max_events_per_recipient, 10);
    }
}
