//! Pond Sentinel - streaming change detection and alerting for aquaculture ponds
//!
//! Accepts sensor readings over HTTP, runs per-series change detection,
//! scores pond health, raises deduplicated alerts and keeps hour/day
//! aggregates of every series.

use anyhow::{Context, Result};
use pond_sentinel::{api, config::SentinelConfig, tasks::BackgroundTasks};
use sentinel_lib::notify::{
    DeliveryLog, DispatchQueue, DispatchWorker, Dispatcher, LogChannel, NotificationChannel,
    StaticCatalog, WebhookChannel,
};
use sentinel_lib::{
    Clock, Engine, FileStore, HealthRegistry, MaintenanceLoop, MemoryStore, Store, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SENTINEL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pond-sentinel");

    // Optional config path as the only argument
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = SentinelConfig::load(config_path.as_deref())?;
    info!(instance = %config.instance, "Sentinel configured");

    let store: Arc<dyn Store> = match &config.state_dir {
        Some(dir) => Arc::new(
            FileStore::open(dir)
                .with_context(|| format!("Failed to open state directory {}", dir.display()))?,
        ),
        None => {
            warn!("No state_dir configured, engine state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let health_registry = HealthRegistry::with_all_components().await;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Notification pipeline
    let notifications = &config.engine.notifications;
    let channel: Arc<dyn NotificationChannel> = match &notifications.webhook_url {
        Some(url) => Arc::new(
            WebhookChannel::new(url, Duration::from_secs(notifications.request_timeout_secs))
                .context("Failed to configure webhook channel")?,
        ),
        None => Arc::new(LogChannel),
    };
    let catalog = Arc::new(StaticCatalog::new(notifications.default_locale.clone()));
    let dispatcher =
        Arc::new(Dispatcher::new(notifications, channel, catalog).with_clock(clock.clone()));
    let (queue, receiver) = DispatchQueue::bounded(notifications.queue_size);
    let deliveries = DeliveryLog::new();
    let max_in_flight = notifications.max_in_flight;

    let engine = Engine::builder(config.engine.clone())
        .store(store.clone())
        .clock(clock)
        .dispatch_queue(queue)
        .delivery_log(deliveries.clone())
        .health(health_registry.clone())
        .instance(config.instance.clone())
        .build()
        .context("Failed to build engine")?;
    let engine = Arc::new(engine);

    let restored = engine
        .restore()
        .await
        .context("Failed to restore aggregation state")?;
    engine.logger().log_startup(SENTINEL_VERSION, restored);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let worker = DispatchWorker::new(
        dispatcher,
        receiver,
        store,
        health_registry.clone(),
        sentinel_lib::EngineMetrics::new(),
        engine.logger().clone(),
        deliveries,
        max_in_flight,
    );
    let background = BackgroundTasks::spawn(MaintenanceLoop::new(engine.clone()), worker);

    let app_state = Arc::new(api::AppState::new(engine.clone()));
    let api_handle = tokio::spawn(api::serve(
        config.bind_addr(),
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Mark the service as ready after initialization
    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    engine.logger().log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    info!("Shutting down");

    let _ = shutdown_tx.send(());

    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }
    background.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}
