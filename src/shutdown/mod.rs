//! Graceful shutdown handling for the delivery service.
//!
//! Shutdown runs in phases:
//! 1. Send a `shutdown` frame with a reconnect hint to every live stream
//! 2. Signal background tasks to stop
//! 3. Give clients a moment to disconnect on their own
//! 4. Close whatever is left

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionRegistry;
use crate::sse::StreamFrame;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time allowed for writing shutdown frames (default: 5 seconds)
    pub client_notification_timeout: Duration,
    /// Time to wait for clients to disconnect before closing streams (default: 2 seconds)
    pub drain_timeout: Duration,
    /// Suggested reconnect delay sent to clients (default: 5 seconds)
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            reconnect_after_seconds: 5,
        }
    }
}

/// Coordinates the shutdown sequence
pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<ConnectionRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(registry, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.connection_count())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        tracing::info!("Phase 2: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 3: Waiting for clients to disconnect");
        result.connections_closed = self.wait_for_connections_to_close().await;

        tracing::info!("Phase 4: Closing remaining streams");
        result.connections_forced = self.registry.disconnect_all();

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            connections_forced = result.connections_forced,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    async fn notify_clients(&self, reason: &str) -> usize {
        let total = self.registry.connection_count();
        if total == 0 {
            return 0;
        }

        tracing::info!(total_connections = total, "Sending shutdown frames to clients");

        let frame = StreamFrame::shutdown(reason, self.config.reconnect_after_seconds);
        match timeout(
            self.config.client_notification_timeout,
            self.registry.broadcast_to_all(frame),
        )
        .await
        {
            Ok(notified) => {
                tracing::info!(notified = notified, total = total, "Shutdown frames sent");
                notified
            }
            Err(_) => {
                tracing::warn!(
                    total = total,
                    timeout_ms = self.config.client_notification_timeout.as_millis() as u64,
                    "Timed out sending shutdown frames"
                );
                0
            }
        }
    }

    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.registry.connection_count();
        if initial == 0 {
            return 0;
        }

        let wait_future = async {
            while self.registry.connection_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        let _ = timeout(self.config.drain_timeout, wait_future).await;

        initial.saturating_sub(self.registry.connection_count())
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    /// Streams that received the shutdown frame
    pub clients_notified: usize,
    /// Streams the clients closed themselves during the drain window
    pub connections_closed: usize,
    /// Streams closed by the server after the drain window
    pub connections_forced: usize,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SseConfig;
    use crate::sse::StreamEventKind;

    fn quick_config() -> ShutdownConfig {
        ShutdownConfig {
            client_notification_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_millis(200),
            reconnect_after_seconds: 7,
        }
    }

    #[tokio::test]
    async fn test_shutdown_no_connections() {
        let registry = Arc::new(ConnectionRegistry::new(&SseConfig::default()));
        let (tx, _) = broadcast::channel(1);
        let shutdown = GracefulShutdown::new(registry, tx);

        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert_eq!(result.clients_notified, 0);
        assert_eq!(result.connections_closed, 0);
        assert_eq!(result.connections_forced, 0);
    }

    #[tokio::test]
    async fn test_shutdown_notifies_and_closes_streams() {
        let registry = Arc::new(ConnectionRegistry::new(&SseConfig {
            heartbeat_interval: 0,
            ..SseConfig::default()
        }));
        let mut stream = registry.connect("user-1").unwrap();
        let (tx, mut rx) = broadcast::channel(1);

        let shutdown = GracefulShutdown::with_config(registry.clone(), tx, quick_config());
        let result = shutdown.execute("maintenance").await;

        assert_eq!(result.clients_notified, 1);
        assert_eq!(result.connections_forced, 1);
        assert_eq!(registry.connection_count(), 0);
        assert!(rx.try_recv().is_ok());

        let frame = stream.receiver.recv().await.unwrap();
        assert_eq!(frame.event, StreamEventKind::Shutdown);
        assert_eq!(frame.data["reconnectAfter"], 7);
        // Queue is closed after the shutdown frame
        assert!(stream.receiver.recv().await.is_none());
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.client_notification_timeout, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(2));
        assert_eq!(config.reconnect_after_seconds, 5);
    }
}
