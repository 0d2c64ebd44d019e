use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use notification_delivery_service::config::Settings;
use notification_delivery_service::delivery::{PrimaryChannel, RedisPubSubChannel, UnconfiguredChannel};
use notification_delivery_service::server::{create_app, AppState};
use notification_delivery_service::shutdown::{GracefulShutdown, ShutdownConfig};
use notification_delivery_service::tasks::{MaintenanceConfig, MaintenanceTask};
use notification_delivery_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    let primary = select_primary_channel(&settings);

    // Create application state
    let (state, intake_worker) = AppState::new(settings.clone(), primary);
    tracing::info!("Application state initialized");

    // Start intake worker in background
    let intake_handle = tokio::spawn(intake_worker.run(state.shutdown.subscribe()));

    // Start maintenance task in background
    let maintenance_task = MaintenanceTask::new(
        MaintenanceConfig::from_settings(&settings),
        state.registry.clone(),
        state.event_store.clone(),
        state.limiter.clone(),
        state.shutdown.subscribe(),
    );
    let maintenance_handle = tokio::spawn(maintenance_task.run());

    let graceful = GracefulShutdown::with_config(
        state.registry.clone(),
        state.shutdown.clone(),
        ShutdownConfig {
            reconnect_after_seconds: settings.sse.reconnect_after_seconds,
            ..ShutdownConfig::default()
        },
    );

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Open streams never finish on their own, so they are closed before the server drains
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let reason = wait_for_signal().await;
            graceful.execute(reason).await;
        })
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(intake_handle, maintenance_handle) },
    )
    .await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Redis pub/sub when `redis.url` is set, otherwise every send goes to the fallback
fn select_primary_channel(settings: &Settings) -> Arc<dyn PrimaryChannel> {
    let Some(url) = settings.redis.url.as_deref() else {
        tracing::warn!("No redis.url configured, primary channel disabled");
        return Arc::new(UnconfiguredChannel);
    };

    match RedisPubSubChannel::new(&settings.redis, url) {
        Ok(channel) => {
            tracing::info!(prefix = %settings.redis.channel_prefix, "Primary channel: Redis pub/sub");
            Arc::new(channel)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Invalid redis.url, primary channel disabled");
            Arc::new(UnconfiguredChannel)
        }
    }
}

async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "server shutting down"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "server shutting down"
        }
    }
}
