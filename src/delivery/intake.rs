//! Typed intake channel for in-process producers.
//!
//! Producers hand a `DeliveryRequest` to `DeliveryIntake` and move on; the
//! `IntakeWorker` drains the queue into the orchestrator until shutdown. On
//! shutdown the queue is closed to new work and what is already queued gets
//! a bounded window to finish; the rest is counted as abandoned.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::metrics::DeliveryMetrics;

use super::orchestrator::DeliveryOrchestrator;
use super::types::{BroadcastTarget, Notification};

/// Work item accepted by the intake channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryRequest {
    Send {
        #[serde(rename = "userId")]
        recipient_id: String,
        notification: Notification,
    },
    Broadcast {
        target: BroadcastTarget,
        notification: Notification,
    },
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Delivery intake is full")]
    Full,
    #[error("Delivery intake is closed")]
    Closed,
}

/// Producer-side handle of the intake channel
#[derive(Clone)]
pub struct DeliveryIntake {
    sender: mpsc::Sender<DeliveryRequest>,
}

impl DeliveryIntake {
    /// Enqueue a request, waiting for capacity
    pub async fn submit(&self, request: DeliveryRequest) -> Result<(), IntakeError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| IntakeError::Closed)
    }

    /// Enqueue a request without waiting
    pub fn try_submit(&self, request: DeliveryRequest) -> Result<(), IntakeError> {
        self.sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IntakeError::Full,
            mpsc::error::TrySendError::Closed(_) => IntakeError::Closed,
        })
    }
}

/// Time queued requests get to finish once shutdown is signalled
const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Background worker feeding queued requests to the orchestrator
pub struct IntakeWorker {
    orchestrator: Arc<DeliveryOrchestrator>,
    receiver: mpsc::Receiver<DeliveryRequest>,
    drain_window: Duration,
}

/// What happened to requests still queued when shutdown was signalled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeDrain {
    pub processed: usize,
    pub abandoned: usize,
}

/// Create a bounded intake channel bound to an orchestrator
pub fn intake_channel(
    orchestrator: Arc<DeliveryOrchestrator>,
    capacity: usize,
) -> (DeliveryIntake, IntakeWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        DeliveryIntake { sender },
        IntakeWorker {
            orchestrator,
            receiver,
            drain_window: DEFAULT_DRAIN_WINDOW,
        },
    )
}

impl IntakeWorker {
    pub fn with_drain_window(mut self, drain_window: Duration) -> Self {
        self.drain_window = drain_window;
        self
    }

    /// Process requests until the shutdown signal fires or every producer is gone
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> IntakeDrain {
        tracing::info!("Delivery intake worker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Delivery intake worker received shutdown signal");
                    break;
                }
                request = self.receiver.recv() => {
                    match request {
                        Some(request) => self.handle(request).await,
                        None => {
                            tracing::info!("Delivery intake worker stopped");
                            return IntakeDrain::default();
                        }
                    }
                }
            }
        }

        let drain = self.drain().await;
        tracing::info!(
            processed = drain.processed,
            abandoned = drain.abandoned,
            "Delivery intake worker stopped"
        );
        drain
    }

    /// Refuse new work, then finish what is queued within the drain window
    async fn drain(&mut self) -> IntakeDrain {
        self.receiver.close();
        let deadline = tokio::time::Instant::now() + self.drain_window;
        let mut drain = IntakeDrain::default();

        while tokio::time::Instant::now() < deadline {
            let Ok(request) = self.receiver.try_recv() else {
                break;
            };
            if tokio::time::timeout_at(deadline, self.handle(request)).await.is_err() {
                drain.abandoned += 1;
                break;
            }
            drain.processed += 1;
        }

        while self.receiver.try_recv().is_ok() {
            drain.abandoned += 1;
        }

        if drain.abandoned > 0 {
            DeliveryMetrics::record_intake_abandoned(drain.abandoned as u64);
            tracing::warn!(
                abandoned = drain.abandoned,
                window_ms = self.drain_window.as_millis() as u64,
                "Queued delivery requests abandoned at shutdown"
            );
        }
        drain
    }

    async fn handle(&self, request: DeliveryRequest) {
        let result = match &request {
            DeliveryRequest::Send {
                recipient_id,
                notification,
            } => self.orchestrator.send(recipient_id, notification).await,
            DeliveryRequest::Broadcast {
                target,
                notification,
            } => self.orchestrator.broadcast(notification, target).await,
        };

        tracing::debug!(
            success = result.success,
            method = %result.method,
            "Processed queued delivery request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakers;
    use crate::config::{EventStoreConfig, SseConfig};
    use crate::connection_manager::ConnectionRegistry;
    use crate::delivery::{DeliveryEvent, RetryPolicy, UnconfiguredChannel};
    use crate::event_store::MemoryEventStore;
    use std::time::Duration;

    fn orchestrator(registry: Arc<ConnectionRegistry>) -> Arc<DeliveryOrchestrator> {
        Arc::new(DeliveryOrchestrator::new(
            Arc::new(UnconfiguredChannel),
            registry,
            Arc::new(MemoryEventStore::new(EventStoreConfig::default())),
            Arc::new(CircuitBreakers::default()),
            RetryPolicy::default(),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn test_worker_delivers_queued_requests() {
        let registry = Arc::new(ConnectionRegistry::new(&SseConfig::default()));
        let mut stream = registry.connect("user-1").unwrap();
        let orchestrator = orchestrator(registry);
        let mut events = orchestrator.subscribe();
        let (intake, worker) = intake_channel(orchestrator, 8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(worker.run(shutdown_rx));

        intake
            .submit(DeliveryRequest::Send {
                recipient_id: "user-1".into(),
                notification: Notification::new("n1", "system", "Hi", "x"),
            })
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), stream.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.id, Some(1));
        assert!(matches!(
            events.recv().await.unwrap(),
            DeliveryEvent::Succeeded { .. }
        ));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Worker should stop")
            .expect("Worker should not panic");
    }

    fn request(n: usize) -> DeliveryRequest {
        DeliveryRequest::Send {
            recipient_id: "user-1".into(),
            notification: Notification::new(format!("n{}", n), "system", "Hi", "x"),
        }
    }

    #[tokio::test]
    async fn test_queued_requests_are_processed_after_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new(&SseConfig::default()));
        let mut stream = registry.connect("user-1").unwrap();
        let (intake, worker) = intake_channel(orchestrator(registry), 8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for n in 0..3 {
            tokio_test::assert_ok!(intake.try_submit(request(n)));
        }
        // Signalled before the worker ever polls its queue
        shutdown_tx.send(()).unwrap();

        let drain = worker.run(shutdown_rx).await;
        assert_eq!(drain, IntakeDrain { processed: 3, abandoned: 0 });

        for expected in 1..=3 {
            assert_eq!(stream.receiver.recv().await.unwrap().id, Some(expected));
        }
        assert!(matches!(intake.try_submit(request(4)), Err(IntakeError::Closed)));
    }

    #[tokio::test]
    async fn test_requests_beyond_drain_window_are_abandoned() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (intake, worker) = intake_channel(orchestrator(registry), 8);
        let worker = worker.with_drain_window(Duration::ZERO);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for n in 0..4 {
            tokio_test::assert_ok!(intake.try_submit(request(n)));
        }
        shutdown_tx.send(()).unwrap();

        let drain = worker.run(shutdown_rx).await;
        assert_eq!(drain, IntakeDrain { processed: 0, abandoned: 4 });
    }

    #[tokio::test]
    async fn test_try_submit_reports_full() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (intake, _worker) = intake_channel(orchestrator(registry), 1);
        let request = DeliveryRequest::Broadcast {
            target: BroadcastTarget::All,
            notification: Notification::new("n1", "system", "Hi", "x"),
        };

        tokio_test::assert_ok!(intake.try_submit(request.clone()));
        assert!(matches!(intake.try_submit(request), Err(IntakeError::Full)));
    }

    #[tokio::test]
    async fn test_submit_after_worker_dropped_is_closed() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (intake, worker) = intake_channel(orchestrator(registry), 4);
        drop(worker);

        let request = DeliveryRequest::Send {
            recipient_id: "user-1".into(),
            notification: Notification::new("n1", "system", "Hi", "x"),
        };
        let err = tokio_test::assert_err!(intake.submit(request).await);
        assert!(matches!(err, IntakeError::Closed));
    }

    #[test]
    fn test_request_wire_format() {
        let request: DeliveryRequest = serde_json::from_value(serde_json::json!({
            "kind": "send",
            "userId": "user-1",
            "notification": {"id": "n1", "type": "system", "title": "Hi", "message": "x"}
        }))
        .unwrap();
        assert!(matches!(request, DeliveryRequest::Send { ref recipient_id, .. } if recipient_id == "user-1"));
    }
}
