use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

use crate::circuit_breaker::{CircuitBreakers, CircuitState};
use crate::event_store::{EventStore, StoredEvent};
use crate::metrics::DeliveryMetrics;
use crate::sse::StreamFrame;

use super::channel::{ChannelError, FallbackChannel, PrimaryChannel, PublishReceipt, PublishTarget};
use super::retry::RetryPolicy;
use super::types::{
    BroadcastTarget, DeliveryErrorCode, DeliveryEvent, DeliveryMethod, DeliveryResult,
    Notification,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Process-wide delivery counters
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub total_sent: AtomicU64,
    pub primary_sent: AtomicU64,
    pub fallback_sent: AtomicU64,
    pub fallbacks_used: AtomicU64,
    pub failed: AtomicU64,
    pub broadcasts: AtomicU64,
    pub forced: AtomicU64,
    pub primary_attempts: AtomicU64,
    pub primary_failures: AtomicU64,
    pub circuit_open_skips: AtomicU64,
}

impl DeliveryStats {
    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            primary_sent: self.primary_sent.load(Ordering::Relaxed),
            fallback_sent: self.fallback_sent.load(Ordering::Relaxed),
            fallbacks_used: self.fallbacks_used.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            forced: self.forced.load(Ordering::Relaxed),
            primary_attempts: self.primary_attempts.load(Ordering::Relaxed),
            primary_failures: self.primary_failures.load(Ordering::Relaxed),
            circuit_open_skips: self.circuit_open_skips.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of delivery statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatsSnapshot {
    pub total_sent: u64,
    pub primary_sent: u64,
    pub fallback_sent: u64,
    pub fallbacks_used: u64,
    pub failed: u64,
    pub broadcasts: u64,
    pub forced: u64,
    pub primary_attempts: u64,
    pub primary_failures: u64,
    pub circuit_open_skips: u64,
}

/// Transport health as seen by the orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryHealth {
    pub primary_healthy: bool,
    pub fallback_healthy: bool,
    pub primary_configured: bool,
    pub primary_circuit: CircuitState,
    pub checked_at: DateTime<Utc>,
}

/// Why the primary channel did not deliver
struct PrimaryFailure {
    code: DeliveryErrorCode,
    message: String,
    /// Recipients the primary reached before giving up
    delivered: Vec<String>,
}

/// Chooses a transport for every notification.
///
/// Primary first (guarded by the circuit breaker and a bounded retry ladder),
/// then local fan-out through the fallback channel. Every delivered
/// notification is appended to the event store before the result is returned.
pub struct DeliveryOrchestrator {
    primary: Arc<dyn PrimaryChannel>,
    fallback: Arc<dyn FallbackChannel>,
    event_store: Arc<dyn EventStore>,
    breakers: Arc<CircuitBreakers>,
    retry: RetryPolicy,
    primary_timeout: Duration,
    stats: DeliveryStats,
    events: broadcast::Sender<DeliveryEvent>,
}

impl DeliveryOrchestrator {
    pub fn new(
        primary: Arc<dyn PrimaryChannel>,
        fallback: Arc<dyn FallbackChannel>,
        event_store: Arc<dyn EventStore>,
        breakers: Arc<CircuitBreakers>,
        retry: RetryPolicy,
        primary_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            primary,
            fallback,
            event_store,
            breakers,
            retry,
            primary_timeout,
            stats: DeliveryStats::default(),
            events,
        }
    }

    /// Subscribe to delivery outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> DeliveryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub async fn health_status(&self) -> DeliveryHealth {
        let primary_circuit = self.breakers.state(self.primary.name());
        let primary_configured = self.primary.is_configured();
        let primary_healthy = primary_configured
            && primary_circuit != CircuitState::Open
            && self.primary.health_check().await;

        DeliveryHealth {
            primary_healthy,
            fallback_healthy: self.fallback.is_healthy(),
            primary_configured,
            primary_circuit,
            checked_at: Utc::now(),
        }
    }

    /// Deliver a notification to one recipient
    #[tracing::instrument(
        name = "orchestrator.send",
        skip(self, notification),
        fields(notification_id = %notification.id, notification_type = %notification.notification_type)
    )]
    pub async fn send(&self, recipient_id: &str, notification: &Notification) -> DeliveryResult {
        if let Some(rejected) = self.validate(Some(recipient_id), notification) {
            return self.finish(rejected, notification, Some(recipient_id), Instant::now());
        }

        let started = Instant::now();
        let recipient_id = recipient_id.trim();
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);

        let target = PublishTarget::Recipient(recipient_id.to_string());
        let result = match self.attempt_primary(&target, notification).await {
            Ok(receipt) => {
                let event_id = self
                    .store(recipient_id, notification)
                    .await
                    .map(|event| event.event_id);
                self.stats.primary_sent.fetch_add(1, Ordering::Relaxed);
                DeliveryResult::delivered(
                    DeliveryMethod::Primary,
                    false,
                    json!({ "eventId": event_id, "publish": receipt }),
                )
            }
            Err(failure) => {
                tracing::info!(
                    recipient_id = %recipient_id,
                    reason = %failure.code,
                    error = %failure.message,
                    "Primary unavailable, using fallback"
                );
                self.deliver_fallback(recipient_id, notification, true).await
            }
        };

        self.finish(result, notification, Some(recipient_id), started)
    }

    /// Deliver a notification to a set of recipients
    #[tracing::instrument(
        name = "orchestrator.broadcast",
        skip(self, notification, target),
        fields(notification_id = %notification.id, all = matches!(target, BroadcastTarget::All))
    )]
    pub async fn broadcast(&self, notification: &Notification, target: &BroadcastTarget) -> DeliveryResult {
        if let Some(rejected) = self.validate(None, notification) {
            return self.finish(rejected, notification, None, Instant::now());
        }
        if let BroadcastTarget::Recipients(ids) = target {
            if ids.is_empty() || ids.iter().any(|id| id.trim().is_empty()) {
                let rejected = DeliveryResult::failed(
                    DeliveryMethod::Primary,
                    false,
                    DeliveryErrorCode::InvalidUserId,
                    "broadcast recipients must be non-empty ids",
                );
                return self.finish(rejected, notification, None, Instant::now());
            }
        }

        let started = Instant::now();
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        let publish_target = match target {
            BroadcastTarget::All => PublishTarget::Broadcast,
            BroadcastTarget::Recipients(ids) => {
                PublishTarget::Recipients(ids.iter().map(|id| id.trim().to_string()).collect())
            }
        };

        let result = match self.attempt_primary(&publish_target, notification).await {
            Ok(receipt) => {
                let recipients = match target {
                    BroadcastTarget::All => self.fallback.connected_recipients(),
                    BroadcastTarget::Recipients(ids) => {
                        ids.iter().map(|id| id.trim().to_string()).collect()
                    }
                };
                let mut stored = 0usize;
                for recipient_id in &recipients {
                    if self.store(recipient_id, notification).await.is_some() {
                        stored += 1;
                    }
                }
                self.stats.primary_sent.fetch_add(1, Ordering::Relaxed);
                DeliveryResult::delivered(
                    DeliveryMethod::Primary,
                    false,
                    json!({ "eventsStored": stored, "publish": receipt }),
                )
            }
            Err(failure) => {
                tracing::info!(
                    reason = %failure.code,
                    error = %failure.message,
                    reached = failure.delivered.len(),
                    "Primary unavailable for broadcast, using fallback"
                );
                // Recipients the primary already reached keep their event and are not fanned out again
                for recipient_id in &failure.delivered {
                    self.store(recipient_id, notification).await;
                }
                let remaining = match target {
                    BroadcastTarget::Recipients(ids) if !failure.delivered.is_empty() => {
                        BroadcastTarget::Recipients(
                            ids.iter()
                                .map(|id| id.trim().to_string())
                                .filter(|id| !failure.delivered.contains(id))
                                .collect(),
                        )
                    }
                    _ => target.clone(),
                };
                self.broadcast_fallback(notification, &remaining).await
            }
        };

        self.finish(result, notification, None, started)
    }

    /// Deliver through exactly one named channel, bypassing breaker and retries
    #[tracing::instrument(
        name = "orchestrator.force_method",
        skip(self, notification),
        fields(notification_id = %notification.id)
    )]
    pub async fn force_method(
        &self,
        method: &str,
        recipient_id: &str,
        notification: &Notification,
    ) -> DeliveryResult {
        let method = match method.parse::<DeliveryMethod>() {
            Ok(method) => method,
            Err(e) => {
                let rejected = DeliveryResult::failed(
                    DeliveryMethod::Primary,
                    false,
                    DeliveryErrorCode::InvalidDeliveryMethod,
                    e.to_string(),
                );
                return self.finish(rejected, notification, Some(recipient_id), Instant::now());
            }
        };
        if let Some(rejected) = self.validate(Some(recipient_id), notification) {
            return self.finish(rejected, notification, Some(recipient_id), Instant::now());
        }

        let started = Instant::now();
        let recipient_id = recipient_id.trim();
        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.forced.fetch_add(1, Ordering::Relaxed);

        let result = match method {
            DeliveryMethod::Primary => {
                let target = PublishTarget::Recipient(recipient_id.to_string());
                match self.publish_once(&target, notification).await {
                    Ok(receipt) => {
                        let event_id = self
                            .store(recipient_id, notification)
                            .await
                            .map(|event| event.event_id);
                        self.stats.primary_sent.fetch_add(1, Ordering::Relaxed);
                        DeliveryResult::delivered(
                            DeliveryMethod::Primary,
                            false,
                            json!({ "eventId": event_id, "publish": receipt }),
                        )
                    }
                    Err(e) => DeliveryResult::failed(
                        DeliveryMethod::Primary,
                        false,
                        DeliveryErrorCode::ChannelError,
                        e.to_string(),
                    ),
                }
            }
            DeliveryMethod::Fallback => self.deliver_fallback(recipient_id, notification, false).await,
        };

        self.finish(result, notification, Some(recipient_id), started)
    }

    fn validate(&self, recipient_id: Option<&str>, notification: &Notification) -> Option<DeliveryResult> {
        if recipient_id.is_some_and(|id| id.trim().is_empty()) {
            return Some(DeliveryResult::failed(
                DeliveryMethod::Primary,
                false,
                DeliveryErrorCode::InvalidUserId,
                "recipient id must not be empty",
            ));
        }
        if !notification.is_valid() {
            return Some(DeliveryResult::failed(
                DeliveryMethod::Primary,
                false,
                DeliveryErrorCode::InvalidNotificationData,
                "notification id, title and message are required",
            ));
        }
        None
    }

    /// Walk the retry ladder against the primary channel.
    ///
    /// The breaker is consulted before every attempt, so an open breaker stops
    /// the ladder and a half-open breaker admits exactly one trial. Recipients
    /// reached by a partially failed attempt are not published to again.
    async fn attempt_primary(
        &self,
        target: &PublishTarget,
        notification: &Notification,
    ) -> Result<PublishReceipt, PrimaryFailure> {
        if !self.primary.is_configured() {
            return Err(PrimaryFailure {
                code: DeliveryErrorCode::ChannelError,
                message: ChannelError::NotConfigured.to_string(),
                delivered: Vec::new(),
            });
        }

        let channel = self.primary.name();
        let max_attempts = self.retry.max_attempts();
        let mut remaining = target.clone();
        let mut progress = PublishReceipt::default();
        let mut delivered: Vec<String> = Vec::new();
        let mut last_error: Option<ChannelError> = None;

        for attempt in 1..=max_attempts {
            if !self.breakers.is_available(channel) {
                self.stats.circuit_open_skips.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_circuit_open_skip();
                let (code, message) = match last_error {
                    Some(e) => (DeliveryErrorCode::ChannelError, e.to_string()),
                    None => (
                        DeliveryErrorCode::CircuitOpen,
                        format!("circuit open for channel {}", channel),
                    ),
                };
                return Err(PrimaryFailure {
                    code,
                    message,
                    delivered,
                });
            }

            match self.publish_once(&remaining, notification).await {
                Ok(receipt) => {
                    self.breakers.record_success(channel);
                    progress.merge(receipt);
                    return Ok(progress);
                }
                Err(e) => {
                    self.breakers.record_failure(channel);
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Primary delivery attempt failed"
                    );
                    let retryable = e.is_retryable();
                    let e = match e {
                        ChannelError::Partial {
                            delivered: reached,
                            receipt,
                            reason,
                        } => {
                            remaining = remaining.without(&reached);
                            progress.merge(receipt);
                            delivered.extend(reached);
                            ChannelError::Publish(reason)
                        }
                        other => other,
                    };
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }

        Err(PrimaryFailure {
            code: DeliveryErrorCode::ChannelError,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "primary delivery failed".to_string()),
            delivered,
        })
    }

    async fn publish_once(
        &self,
        target: &PublishTarget,
        notification: &Notification,
    ) -> Result<PublishReceipt, ChannelError> {
        self.stats.primary_attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = match tokio::time::timeout(
            self.primary_timeout,
            self.primary.publish(target, notification),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.primary_timeout)),
        };

        DeliveryMetrics::record_primary_attempt(outcome.is_ok());
        if outcome.is_err() {
            self.stats.primary_failures.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Fan a notification out to a recipient's live connections.
    ///
    /// `escalated` is true when the primary channel was tried (or skipped) first.
    async fn deliver_fallback(
        &self,
        recipient_id: &str,
        notification: &Notification,
        escalated: bool,
    ) -> DeliveryResult {
        if !self.fallback.has_recipient(recipient_id) {
            return DeliveryResult::failed(
                DeliveryMethod::Fallback,
                escalated,
                DeliveryErrorCode::NoActiveConnections,
                "no active connections",
            );
        }

        let Some(event) = self.store(recipient_id, notification).await else {
            return DeliveryResult::failed(
                DeliveryMethod::Fallback,
                escalated,
                DeliveryErrorCode::DeliveryFailed,
                "event could not be recorded for replay",
            );
        };

        let event_id = event.event_id;
        let sent = self
            .fallback
            .deliver(recipient_id, StreamFrame::notification(event_id, event.payload))
            .await;

        if sent == 0 {
            return DeliveryResult::failed(
                DeliveryMethod::Fallback,
                escalated,
                DeliveryErrorCode::DeliveryFailed,
                "all connection writes failed",
            );
        }

        self.stats.fallback_sent.fetch_add(1, Ordering::Relaxed);
        if escalated {
            self.stats.fallbacks_used.fetch_add(1, Ordering::Relaxed);
            DeliveryMetrics::record_fallback_used();
        }
        DeliveryResult::delivered(
            DeliveryMethod::Fallback,
            escalated,
            json!({ "eventId": event_id, "connections": sent }),
        )
    }

    async fn broadcast_fallback(&self, notification: &Notification, target: &BroadcastTarget) -> DeliveryResult {
        let recipients: Vec<String> = match target {
            BroadcastTarget::All => self.fallback.connected_recipients(),
            BroadcastTarget::Recipients(ids) => ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| self.fallback.has_recipient(id))
                .collect(),
        };

        if recipients.is_empty() {
            return DeliveryResult::failed(
                DeliveryMethod::Fallback,
                true,
                DeliveryErrorCode::NoActiveConnections,
                "no active connections",
            );
        }

        let mut reached = 0usize;
        let mut connections = 0usize;
        for recipient_id in &recipients {
            let Some(event) = self.store(recipient_id, notification).await else {
                continue;
            };
            let sent = self
                .fallback
                .deliver(recipient_id, StreamFrame::notification(event.event_id, event.payload))
                .await;
            if sent > 0 {
                reached += 1;
                connections += sent;
            }
        }

        if reached == 0 {
            return DeliveryResult::failed(
                DeliveryMethod::Fallback,
                true,
                DeliveryErrorCode::DeliveryFailed,
                "all connection writes failed",
            );
        }

        self.stats.fallback_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.fallbacks_used.fetch_add(1, Ordering::Relaxed);
        DeliveryMetrics::record_fallback_used();
        DeliveryResult::delivered(
            DeliveryMethod::Fallback,
            true,
            json!({ "recipients": reached, "connections": connections }),
        )
    }

    async fn store(&self, recipient_id: &str, notification: &Notification) -> Option<StoredEvent> {
        let payload = serde_json::to_value(notification).unwrap_or_default();
        match self.event_store.append(recipient_id, payload).await {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::error!(
                    recipient_id = %recipient_id,
                    notification_id = %notification.id,
                    error = %e,
                    "Failed to record event for replay"
                );
                None
            }
        }
    }

    fn finish(
        &self,
        result: DeliveryResult,
        notification: &Notification,
        recipient_id: Option<&str>,
        started: Instant,
    ) -> DeliveryResult {
        let event = if result.success {
            DeliveryMetrics::record_success(result.method.as_str(), started.elapsed().as_secs_f64());
            DeliveryEvent::Succeeded {
                notification_id: notification.id.clone(),
                recipient_id: recipient_id.map(str::to_string),
                method: result.method,
                fallback_used: result.fallback_used,
            }
        } else {
            let code = result.error_code.unwrap_or(DeliveryErrorCode::DeliveryFailed);
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            DeliveryMetrics::record_failure(result.method.as_str(), code.as_str());
            tracing::warn!(
                notification_id = %notification.id,
                recipient_id = ?recipient_id,
                code = %code,
                error = ?result.error,
                "Notification delivery failed"
            );
            DeliveryEvent::Failed {
                notification_id: notification.id.clone(),
                recipient_id: recipient_id.map(str::to_string),
                error_code: code,
                error: result.error.clone().unwrap_or_default(),
            }
        };

        // No subscribers is fine
        let _ = self.events.send(event);
        result
    }
}
