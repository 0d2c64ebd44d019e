use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::auth::{JwtValidator, TokenVerifier};
use crate::circuit_breaker::CircuitBreakers;
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::delivery::{
    intake_channel, DeliveryIntake, DeliveryOrchestrator, IntakeWorker, PrimaryChannel,
    RetryPolicy,
};
use crate::event_store::{EventStore, MemoryEventStore};
use crate::ratelimit::AdmissionLimiter;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub registry: Arc<ConnectionRegistry>,
    pub event_store: Arc<dyn EventStore>,
    pub breakers: Arc<CircuitBreakers>,
    pub orchestrator: Arc<DeliveryOrchestrator>,
    pub limiter: Arc<AdmissionLimiter>,
    pub intake: DeliveryIntake,
    /// Fires once when the process starts shutting down
    pub shutdown: broadcast::Sender<()>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every component from settings and the selected primary channel.
    ///
    /// The returned worker serves `intake` and must be spawned by the caller.
    pub fn new(settings: Settings, primary: Arc<dyn PrimaryChannel>) -> (Self, IntakeWorker) {
        let token_verifier: Arc<dyn TokenVerifier> = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(ConnectionRegistry::new(&settings.sse));
        let event_store: Arc<dyn EventStore> =
            Arc::new(MemoryEventStore::new(settings.event_store.clone()));
        let breakers = Arc::new(CircuitBreakers::new(settings.circuit_breaker.clone()));
        let limiter = Arc::new(AdmissionLimiter::new(settings.rate_limit.clone()));

        let orchestrator = Arc::new(DeliveryOrchestrator::new(
            primary,
            registry.clone(),
            event_store.clone(),
            breakers.clone(),
            RetryPolicy::from_config(&settings.delivery),
            Duration::from_millis(settings.delivery.primary_timeout_ms),
        ));

        let (intake, worker) = intake_channel(orchestrator.clone(), settings.delivery.intake_capacity);
        let (shutdown, _) = broadcast::channel(1);

        let state = Self {
            settings: Arc::new(settings),
            token_verifier,
            registry,
            event_store,
            breakers,
            orchestrator,
            limiter,
            intake,
            shutdown,
            start_time: Instant::now(),
        };

        (state, worker)
    }
}
