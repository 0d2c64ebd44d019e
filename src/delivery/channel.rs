//! Transport seams used by the orchestrator.
//!
//! The primary transport is an opaque publish capability (Redis Pub/Sub in
//! production). The fallback transport is the local SSE connection registry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::RedisConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::sse::StreamFrame;

use super::types::Notification;

/// Error raised by a primary channel publish
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Primary channel is not configured")]
    NotConfigured,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Some recipients of a multi-recipient publish were reached before the failure
    #[error("Published to {} recipients before failing: {reason}", delivered.len())]
    Partial {
        delivered: Vec<String>,
        receipt: PublishReceipt,
        reason: String,
    },
}

impl ChannelError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChannelError::NotConfigured)
    }
}

/// Where a primary publish is addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    Recipient(String),
    Recipients(Vec<String>),
    Broadcast,
}

impl PublishTarget {
    /// The same target minus recipients that were already reached
    pub fn without(&self, delivered: &[String]) -> PublishTarget {
        match self {
            PublishTarget::Recipients(ids) => PublishTarget::Recipients(
                ids.iter()
                    .filter(|id| !delivered.contains(id))
                    .cloned()
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Acknowledgment returned by the pub/sub provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    /// Channels the message was published to
    pub channels: Vec<String>,
    /// Subscribers that received it, as reported by the provider
    pub receivers: u64,
}

impl PublishReceipt {
    pub fn merge(&mut self, other: PublishReceipt) {
        self.channels.extend(other.channels);
        self.receivers += other.receivers;
    }
}

/// Primary delivery transport
#[async_trait]
pub trait PrimaryChannel: Send + Sync {
    /// Name used as the circuit breaker key
    fn name(&self) -> &str;

    /// False for the "not configured" variant; deliveries then go straight to fallback
    fn is_configured(&self) -> bool;

    async fn publish(
        &self,
        target: &PublishTarget,
        notification: &Notification,
    ) -> Result<PublishReceipt, ChannelError>;

    async fn health_check(&self) -> bool;
}

/// Local fan-out transport
#[async_trait]
pub trait FallbackChannel: Send + Sync {
    fn has_recipient(&self, recipient_id: &str) -> bool;

    fn connected_recipients(&self) -> Vec<String>;

    /// Write a frame to every live connection of a recipient; returns connections written
    async fn deliver(&self, recipient_id: &str, frame: StreamFrame) -> usize;

    fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl FallbackChannel for ConnectionRegistry {
    fn has_recipient(&self, recipient_id: &str) -> bool {
        self.has_connections(recipient_id)
    }

    fn connected_recipients(&self) -> Vec<String> {
        ConnectionRegistry::connected_recipients(self)
    }

    async fn deliver(&self, recipient_id: &str, frame: StreamFrame) -> usize {
        self.send_to_recipient(recipient_id, frame).await
    }
}

/// Primary channel used when no pub/sub provider is configured
#[derive(Debug, Default)]
pub struct UnconfiguredChannel;

#[async_trait]
impl PrimaryChannel for UnconfiguredChannel {
    fn name(&self) -> &str {
        "primary"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn publish(
        &self,
        _target: &PublishTarget,
        _notification: &Notification,
    ) -> Result<PublishReceipt, ChannelError> {
        Err(ChannelError::NotConfigured)
    }

    async fn health_check(&self) -> bool {
        false
    }
}

/// Redis Pub/Sub primary channel.
///
/// Publishes to `{prefix}:user:{recipient}` or `{prefix}:broadcast`. The
/// multiplexed connection is created lazily and dropped on connection errors
/// so the next publish reconnects.
pub struct RedisPubSubChannel {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    channel_prefix: String,
}

impl RedisPubSubChannel {
    pub fn new(config: &RedisConfig, url: &str) -> Result<Self, ChannelError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
            channel_prefix: config.channel_prefix.clone(),
        })
    }

    fn channels_for(&self, target: &PublishTarget) -> Vec<String> {
        match target {
            PublishTarget::Recipient(id) => vec![format!("{}:user:{}", self.channel_prefix, id)],
            PublishTarget::Recipients(ids) => ids
                .iter()
                .map(|id| format!("{}:user:{}", self.channel_prefix, id))
                .collect(),
            PublishTarget::Broadcast => vec![format!("{}:broadcast", self.channel_prefix)],
        }
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, ChannelError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *conn_guard = Some(conn.clone());
        tracing::info!("Redis publish connection established");
        Ok(conn)
    }

    async fn reset_on_error(&self, error: &RedisError) {
        if error.is_connection_dropped() || error.is_io_error() {
            let mut conn_guard = self.connection.write().await;
            *conn_guard = None;
        }
    }
}

#[async_trait]
impl PrimaryChannel for RedisPubSubChannel {
    fn name(&self) -> &str {
        "primary"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn publish(
        &self,
        target: &PublishTarget,
        notification: &Notification,
    ) -> Result<PublishReceipt, ChannelError> {
        let payload =
            serde_json::to_string(notification).map_err(|e| ChannelError::Publish(e.to_string()))?;
        let channels = self.channels_for(target);
        let mut conn = self.get_connection().await?;

        let mut receivers = 0u64;
        for (index, channel) in channels.iter().enumerate() {
            let result: Result<u64, RedisError> = conn.publish(channel, &payload).await;
            match result {
                Ok(count) => receivers += count,
                Err(e) => {
                    self.reset_on_error(&e).await;
                    return Err(match target {
                        PublishTarget::Recipients(ids) if index > 0 => ChannelError::Partial {
                            delivered: ids[..index].to_vec(),
                            receipt: PublishReceipt {
                                channels: channels[..index].to_vec(),
                                receivers,
                            },
                            reason: e.to_string(),
                        },
                        _ => ChannelError::Redis(e),
                    });
                }
            }
        }

        tracing::debug!(
            notification_id = %notification.id,
            channels = channels.len(),
            receivers = receivers,
            "Published notification to Redis"
        );

        Ok(PublishReceipt { channels, receivers })
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.get_connection().await else {
            return false;
        };
        let pong: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => true,
            Err(e) => {
                self.reset_on_error(&e).await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_channel_never_publishes() {
        let channel = UnconfiguredChannel;
        let notification = Notification::new("n1", "system", "Hi", "x");

        assert!(!channel.is_configured());
        assert!(!channel.health_check().await);
        let err = channel
            .publish(&PublishTarget::Broadcast, &notification)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_redis_channel_names() {
        let config = RedisConfig::default();
        let channel = RedisPubSubChannel::new(&config, "redis://127.0.0.1:6379").unwrap();

        assert_eq!(
            channel.channels_for(&PublishTarget::Recipient("user-1".into())),
            vec!["notification:user:user-1".to_string()]
        );
        assert_eq!(
            channel.channels_for(&PublishTarget::Broadcast),
            vec!["notification:broadcast".to_string()]
        );
        assert_eq!(
            channel
                .channels_for(&PublishTarget::Recipients(vec!["a".into(), "b".into()]))
                .len(),
            2
        );
    }

    #[test]
    fn test_target_without_delivered_recipients() {
        let target = PublishTarget::Recipients(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(
            target.without(&["a".to_string(), "c".to_string()]),
            PublishTarget::Recipients(vec!["b".into()])
        );

        let single = PublishTarget::Recipient("a".into());
        assert_eq!(single.without(&["a".to_string()]), single);
        assert_eq!(PublishTarget::Broadcast.without(&[]), PublishTarget::Broadcast);
    }

    #[test]
    fn test_partial_publish_is_retryable() {
        let err = ChannelError::Partial {
            delivered: vec!["a".into()],
            receipt: PublishReceipt::default(),
            reason: "connection reset".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Published to 1 recipients before failing: connection reset"
        );
    }

    #[tokio::test]
    async fn test_registry_as_fallback() {
        let registry = ConnectionRegistry::default();
        let mut stream = registry.connect("user-1").unwrap();

        assert!(FallbackChannel::has_recipient(&registry, "user-1"));
        assert!(!FallbackChannel::has_recipient(&registry, "user-2"));

        let sent = registry
            .deliver("user-1", StreamFrame::notification(1, serde_json::json!({})))
            .await;
        assert_eq!(sent, 1);
        assert_eq!(stream.receiver.recv().await.unwrap().id, Some(1));
    }
}
