use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::SseConfig;
use crate::metrics::ConnectionMetrics;
use crate::sse::StreamFrame;

use super::stats::{ConnectionInfo, ConnectionStats};
use super::types::{
    CloseReason, ConnectionError, ConnectionHandle, ConnectionLimits, ConnectionStream,
};

/// Manages all live stream connections.
///
/// Lock order: `recipient_index` shard, then `connections` shard. No shard
/// lock is held across a frame write.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// recipient_id -> connection ids, oldest first
    recipient_index: DashMap<String, Vec<Uuid>>,
    limits: ConnectionLimits,
    heartbeat_interval: Duration,
    write_timeout: Duration,
    channel_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(config: &SseConfig) -> Self {
        Self {
            connections: DashMap::new(),
            recipient_index: DashMap::new(),
            limits: ConnectionLimits {
                max_connections: config.max_total_connections,
                max_connections_per_user: config.max_connections_per_user,
            },
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    pub fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    /// Open a connection for a recipient.
    ///
    /// When the recipient is at its cap the oldest connections are evicted
    /// to make room; the new connection is always admitted unless the
    /// process-wide ceiling is hit.
    pub fn connect(&self, recipient_id: &str) -> Result<ConnectionStream, ConnectionError> {
        let recipient_id = recipient_id.trim();
        if recipient_id.is_empty() {
            return Err(ConnectionError::InvalidRecipient);
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let per_user_cap = self.limits.max_connections_per_user.max(1);

        // The handle is stamped under the entry guard so index order matches establishedAt
        let (handle, evicted): (Arc<ConnectionHandle>, Vec<Uuid>) = {
            let mut ids = self.recipient_index.entry(recipient_id.to_string()).or_default();

            let at_cap = ids.len() >= per_user_cap;
            let current = self.connections.len();
            if !at_cap && current >= self.limits.max_connections {
                drop(ids);
                self.recipient_index
                    .remove_if(recipient_id, |_, ids| ids.is_empty());
                tracing::warn!(
                    recipient_id = %recipient_id,
                    current = current,
                    max = self.limits.max_connections,
                    "Connection rejected: total limit reached"
                );
                return Err(ConnectionError::TotalLimitExceeded {
                    current,
                    max: self.limits.max_connections,
                });
            }

            let handle = Arc::new(ConnectionHandle::new(recipient_id.to_string(), tx));
            let overflow = (ids.len() + 1).saturating_sub(per_user_cap);
            let evicted = ids.drain(..overflow).collect();
            ids.push(handle.id);
            self.connections.insert(handle.id, handle.clone());
            (handle, evicted)
        };
        let connection_id = handle.id;

        for old_id in &evicted {
            self.teardown(*old_id, CloseReason::Evicted);
        }

        if !self.heartbeat_interval.is_zero() {
            handle.attach_heartbeat(spawn_heartbeat(
                connection_id,
                handle.sender(),
                self.heartbeat_interval,
            ));
            // Lost a race with a concurrent eviction
            if handle.is_closed() {
                handle.close();
            }
        }

        ConnectionMetrics::record_opened();
        tracing::info!(
            connection_id = %connection_id,
            recipient_id = %recipient_id,
            evicted = evicted.len(),
            "Connection registered"
        );

        Ok(ConnectionStream {
            connection_id,
            recipient_id: recipient_id.to_string(),
            established_at: handle.established_at,
            receiver: rx,
        })
    }

    /// Explicitly close a connection. Returns false if it was already gone.
    pub fn disconnect(&self, connection_id: Uuid) -> bool {
        self.teardown(connection_id, CloseReason::Disconnected)
    }

    fn teardown(&self, connection_id: Uuid, reason: CloseReason) -> bool {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return false;
        };

        self.unindex(&handle.recipient_id, connection_id);
        handle.close();

        let lifetime = (Utc::now() - handle.established_at).num_milliseconds().max(0) as f64 / 1000.0;
        ConnectionMetrics::record_closed(reason.as_str(), lifetime);

        tracing::info!(
            connection_id = %connection_id,
            recipient_id = %handle.recipient_id,
            reason = reason.as_str(),
            "Connection unregistered"
        );
        true
    }

    fn unindex(&self, recipient_id: &str, connection_id: Uuid) {
        let now_empty = match self.recipient_index.get_mut(recipient_id) {
            Some(mut ids) => {
                ids.retain(|id| *id != connection_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.recipient_index
                .remove_if(recipient_id, |_, ids| ids.is_empty());
        }
    }

    /// Fan a frame out to every live connection of a recipient.
    ///
    /// Returns the number of connections written. Connections whose write
    /// fails are removed; the others are unaffected.
    pub async fn send_to_recipient(&self, recipient_id: &str, frame: StreamFrame) -> usize {
        let handles = self.recipient_connections(recipient_id);
        self.fan_out(&handles, &frame).await
    }

    /// Fan a frame out to every live connection
    pub async fn broadcast_to_all(&self, frame: StreamFrame) -> usize {
        let handles = self.all_connections();
        self.fan_out(&handles, &frame).await
    }

    async fn fan_out(&self, handles: &[Arc<ConnectionHandle>], frame: &StreamFrame) -> usize {
        if handles.is_empty() {
            return 0;
        }

        let write_timeout = self.write_timeout;
        let results = join_all(handles.iter().map(|handle| {
            let frame = frame.clone();
            async move { (handle.id, handle.send(frame, write_timeout).await) }
        }))
        .await;

        let mut sent = 0;
        for (connection_id, result) in results {
            match result {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Frame write failed, dropping connection"
                    );
                    self.teardown(connection_id, CloseReason::WriteError);
                }
            }
        }
        sent
    }

    pub fn recipient_connections(&self, recipient_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<Uuid> = self
            .recipient_index
            .get(recipient_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
            .collect()
    }

    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn has_connections(&self, recipient_id: &str) -> bool {
        self.recipient_index
            .get(recipient_id)
            .is_some_and(|ids| !ids.is_empty())
    }

    pub fn connected_recipients(&self) -> Vec<String> {
        self.recipient_index.iter().map(|r| r.key().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Details of a recipient's connections, oldest first
    pub fn connections_for(&self, recipient_id: &str) -> Vec<ConnectionInfo> {
        self.recipient_connections(recipient_id)
            .iter()
            .map(|h| h.info())
            .collect()
    }

    /// Record a heartbeat acknowledgment. The connection must belong to `recipient_id`.
    pub fn record_heartbeat_ack(&self, connection_id: Uuid, recipient_id: &str) -> bool {
        match self.connections.get(&connection_id) {
            Some(handle) if handle.recipient_id == recipient_id => {
                handle.record_heartbeat_ack();
                ConnectionMetrics::record_heartbeat_ack();
                true
            }
            _ => false,
        }
    }

    /// Remove connections whose last heartbeat ack is older than `timeout`
    pub fn cleanup_stale(&self, timeout: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|entry| entry.value().last_heartbeat_ack() <= cutoff)
            .map(|entry| *entry.key())
            .collect();

        stale
            .into_iter()
            .filter(|id| self.teardown(*id, CloseReason::Stale))
            .count()
    }

    /// Close every connection (used on shutdown so open streams terminate)
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<Uuid> = self.connections.iter().map(|r| *r.key()).collect();
        ids.into_iter()
            .filter(|id| self.teardown(*id, CloseReason::Shutdown))
            .count()
    }

    pub fn stats(&self) -> ConnectionStats {
        let per_recipient_counts: HashMap<String, usize> = self
            .recipient_index
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();

        ConnectionStats {
            total_connections: self.connections.len(),
            unique_recipients: per_recipient_counts.len(),
            per_recipient_counts,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(&SseConfig::default())
    }
}

/// Periodic heartbeat writer for one connection.
///
/// A full queue skips the beat; a closed queue ends the task.
fn spawn_heartbeat(
    connection_id: Uuid,
    sender: mpsc::Sender<StreamFrame>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match sender.try_send(StreamFrame::heartbeat(connection_id)) {
                Ok(()) => ConnectionMetrics::record_heartbeat_sent(),
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Outbound queue full, skipping heartbeat");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Stream closed, stopping heartbeat");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::StreamEventKind;
    use serde_json::json;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(&SseConfig {
            heartbeat_interval: 30,
            ..Default::default()
        })
    }

    async fn recv(stream: &mut ConnectionStream) -> Option<StreamFrame> {
        tokio::time::timeout(Duration::from_secs(2), stream.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let registry = registry();

        let stream = registry.connect("user-1").unwrap();
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.has_connections("user-1"));

        assert!(registry.disconnect(stream.connection_id));
        assert!(!registry.disconnect(stream.connection_id));
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.has_connections("user-1"));
        assert_eq!(registry.stats().unique_recipients, 0);
    }

    #[tokio::test]
    async fn test_empty_recipient_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.connect("  "),
            Err(ConnectionError::InvalidRecipient)
        ));
    }

    #[tokio::test]
    async fn test_sixth_connection_evicts_oldest() {
        let registry = registry();

        let mut streams = Vec::new();
        for _ in 0..5 {
            streams.push(registry.connect("user-1").unwrap());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let oldest_id = streams[0].connection_id;
        let oldest_established = streams
            .iter()
            .map(|s| s.established_at)
            .min()
            .unwrap();
        assert_eq!(streams[0].established_at, oldest_established);

        let newest = registry.connect("user-1").unwrap();

        let live: Vec<Uuid> = registry
            .connections_for("user-1")
            .iter()
            .map(|c| c.connection_id)
            .collect();
        assert_eq!(live.len(), 5);
        assert!(!live.contains(&oldest_id));
        assert!(live.contains(&newest.connection_id));
        assert!(registry.get_connection(oldest_id).is_none());

        // The evicted stream terminates
        let mut evicted = streams.remove(0);
        assert!(recv(&mut evicted).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_respect_per_recipient_cap() {
        let registry = Arc::new(registry());
        let barrier = Arc::new(tokio::sync::Barrier::new(24));

        let mut tasks = Vec::new();
        for _ in 0..24 {
            let registry = registry.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                let stream = registry.connect("user-1").unwrap();
                assert!(registry.connections_for("user-1").len() <= 5);
                stream
            }));
        }
        let mut streams = Vec::new();
        for task in tasks {
            streams.push(task.await.unwrap());
        }

        let live = registry.connections_for("user-1");
        assert_eq!(live.len(), 5);
        assert_eq!(registry.connection_count(), 5);
        assert_eq!(registry.stats().per_recipient_counts.get("user-1"), Some(&5));

        // Survivors are the newest, kept oldest first
        assert!(live.windows(2).all(|w| w[0].established_at <= w[1].established_at));
        let oldest_live = live[0].established_at;
        let live_ids: Vec<Uuid> = live.iter().map(|c| c.connection_id).collect();
        for stream in streams.iter().filter(|s| !live_ids.contains(&s.connection_id)) {
            assert!(stream.established_at <= oldest_live);
        }
    }

    #[tokio::test]
    async fn test_send_to_recipient_fans_out() {
        let registry = registry();
        let mut a = registry.connect("user-1").unwrap();
        let mut b = registry.connect("user-1").unwrap();
        let mut other = registry.connect("user-2").unwrap();

        let sent = registry
            .send_to_recipient("user-1", StreamFrame::notification(1, json!({"n": 1})))
            .await;
        assert_eq!(sent, 2);

        assert_eq!(recv(&mut a).await.unwrap().id, Some(1));
        assert_eq!(recv(&mut b).await.unwrap().id, Some(1));
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_failure_removes_only_that_connection() {
        let registry = registry();
        let mut healthy = registry.connect("user-1").unwrap();
        let broken = registry.connect("user-1").unwrap();
        let broken_id = broken.connection_id;
        drop(broken);

        let sent = registry
            .send_to_recipient("user-1", StreamFrame::notification(1, json!({})))
            .await;
        assert_eq!(sent, 1);
        assert!(registry.get_connection(broken_id).is_none());
        assert_eq!(registry.connections_for("user-1").len(), 1);
        assert!(recv(&mut healthy).await.is_some());
    }

    #[tokio::test]
    async fn test_send_to_unknown_recipient() {
        let registry = registry();
        let sent = registry
            .send_to_recipient("nobody", StreamFrame::notification(1, json!({})))
            .await;
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_all() {
        let registry = registry();
        let _a = registry.connect("user-1").unwrap();
        let _b = registry.connect("user-2").unwrap();
        let _c = registry.connect("user-3").unwrap();

        let sent = registry
            .broadcast_to_all(StreamFrame::shutdown("maintenance", 5))
            .await;
        assert_eq!(sent, 3);
    }

    #[tokio::test]
    async fn test_heartbeat_is_written_to_stream() {
        let registry = ConnectionRegistry::new(&SseConfig {
            heartbeat_interval: 1,
            ..Default::default()
        });
        let mut stream = registry.connect("user-1").unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(3), stream.receiver.recv())
            .await
            .expect("Should receive heartbeat")
            .expect("Stream should be open");
        assert_eq!(frame.event, StreamEventKind::Heartbeat);
        assert_eq!(frame.data["connectionId"], stream.connection_id.to_string());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_heartbeat() {
        let registry = registry();
        let mut stream = registry.connect("user-1").unwrap();
        let handle = registry.get_connection(stream.connection_id).unwrap();
        assert!(handle.has_heartbeat());

        registry.disconnect(stream.connection_id);
        assert!(!handle.has_heartbeat());
        assert!(handle.is_closed());

        drop(handle);
        assert!(recv(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_ack_requires_owner() {
        let registry = registry();
        let stream = registry.connect("user-1").unwrap();

        assert!(registry.record_heartbeat_ack(stream.connection_id, "user-1"));
        assert!(!registry.record_heartbeat_ack(stream.connection_id, "user-2"));
        assert!(!registry.record_heartbeat_ack(Uuid::new_v4(), "user-1"));
    }

    #[tokio::test]
    async fn test_total_limit_rejects() {
        let registry = ConnectionRegistry::new(&SseConfig {
            max_total_connections: 2,
            ..Default::default()
        });
        let _a = registry.connect("user-1").unwrap();
        let _b = registry.connect("user-2").unwrap();

        assert!(matches!(
            registry.connect("user-3"),
            Err(ConnectionError::TotalLimitExceeded { current: 2, max: 2 })
        ));
        assert!(!registry.has_connections("user-3"));
    }

    #[tokio::test]
    async fn test_cleanup_stale_and_disconnect_all() {
        let registry = registry();
        let _a = registry.connect("user-1").unwrap();
        let _b = registry.connect("user-2").unwrap();

        assert_eq!(registry.cleanup_stale(Duration::from_secs(3600)), 0);
        assert_eq!(registry.cleanup_stale(Duration::ZERO), 2);

        let _c = registry.connect("user-3").unwrap();
        assert_eq!(registry.disconnect_all(), 1);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = registry();
        let _a = registry.connect("user-1").unwrap();
        let _b = registry.connect("user-1").unwrap();
        let _c = registry.connect("user-2").unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.unique_recipients, 2);
        assert_eq!(stats.per_recipient_counts.get("user-1"), Some(&2));
        assert_eq!(stats.per_recipient_counts.get("user-2"), Some(&1));
    }
}
