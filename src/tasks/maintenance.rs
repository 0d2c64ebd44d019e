use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::event_store::EventStore;
use crate::metrics;
use crate::ratelimit::AdmissionLimiter;

/// Sweep intervals in seconds. A zero `stale_timeout` disables the stale sweep.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub event_cleanup_interval: u64,
    pub ratelimit_cleanup_interval: u64,
    pub connection_cleanup_interval: u64,
    pub stale_timeout: u64,
}

impl MaintenanceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            event_cleanup_interval: settings.event_store.cleanup_interval_seconds,
            ratelimit_cleanup_interval: settings.rate_limit.cleanup_interval_seconds,
            connection_cleanup_interval: settings.sse.cleanup_interval,
            stale_timeout: settings.sse.stale_timeout,
        }
    }
}

/// Background task for event TTL expiry, limiter bucket cleanup and the
/// optional stale connection sweep
pub struct MaintenanceTask {
    config: MaintenanceConfig,
    registry: Arc<ConnectionRegistry>,
    event_store: Arc<dyn EventStore>,
    limiter: Arc<AdmissionLimiter>,
    shutdown: broadcast::Receiver<()>,
}

impl MaintenanceTask {
    pub fn new(
        config: MaintenanceConfig,
        registry: Arc<ConnectionRegistry>,
        event_store: Arc<dyn EventStore>,
        limiter: Arc<AdmissionLimiter>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            event_store,
            limiter,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut event_timer = tokio::time::interval(secs(self.config.event_cleanup_interval));
        let mut ratelimit_timer = tokio::time::interval(secs(self.config.ratelimit_cleanup_interval));
        let mut stale_timer = tokio::time::interval(secs(self.config.connection_cleanup_interval));
        let stale_timeout = self.config.stale_timeout;

        // Skip immediate first tick
        event_timer.tick().await;
        ratelimit_timer.tick().await;
        stale_timer.tick().await;

        tracing::info!(
            event_cleanup_interval_secs = self.config.event_cleanup_interval,
            ratelimit_cleanup_interval_secs = self.config.ratelimit_cleanup_interval,
            stale_timeout_secs = stale_timeout,
            "Maintenance task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal");
                    break;
                }
                _ = event_timer.tick() => {
                    self.expire_events().await;
                }
                _ = ratelimit_timer.tick() => {
                    let removed = self.limiter.cleanup_stale();
                    if removed > 0 {
                        tracing::debug!(removed = removed, "Removed idle rate limit buckets");
                    }
                }
                _ = stale_timer.tick(), if stale_timeout > 0 => {
                    let removed = self.registry.cleanup_stale(Duration::from_secs(stale_timeout));
                    if removed > 0 {
                        tracing::info!(removed = removed, "Removed stale connections");
                    }
                }
            }
        }

        tracing::info!("Maintenance task stopped");
    }

    async fn expire_events(&self) {
        let removed = self.event_store.cleanup_expired().await;
        let stats = self.event_store.stats().await;
        metrics::EVENTS_RETAINED.set(stats.retained_events as i64);

        if removed > 0 {
            tracing::debug!(
                removed = removed,
                retained = stats.retained_events,
                "Expired replay events"
            );
        }
    }
}

/// `tokio::time::interval` panics on a zero period
fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}
