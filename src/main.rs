use std::sync::Arc;

use tracing::info;

use roombook::auth::AdminGate;
use roombook::clock::SystemClock;
use roombook::config::Config;
use roombook::engine::Engine;
use roombook::notify::{Fanout, LogNotifier, Notifier, NotifyHub};
use roombook::service::BookingService;
use roombook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    config.policy.validate()?;
    roombook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("roombook.wal");
    let policy = Arc::new(config.policy);
    let engine = Arc::new(Engine::new(wal_path.clone(), policy.clone(), Arc::new(SystemClock))?);
    let admin_enabled = config.admin_secret.is_some();
    let hub = Arc::new(NotifyHub::new());
    let notifiers: Vec<Arc<dyn Notifier>> = vec![hub, Arc::new(LogNotifier)];
    let service = BookingService::new(engine, AdminGate::new(config.admin_secret), Arc::new(Fanout::new(notifiers)));
    let engine = service.engine().clone();

    info!("roombook started");
    info!("  wal: {}", wal_path.display());
    info!("  bookings loaded: {} ({} confirmed)", engine.booking_count(), service.list_confirmed().bookings.len());
    info!("  rooms: {}", policy.catalog.rooms().len());
    info!("  overflow room: {}", policy.overflow_room.as_deref().unwrap_or("disabled"));
    info!("  admin access: {}", if admin_enabled { "enabled" } else { "disabled" });
    info!("  retention: {} days, sweep every {}s", policy.retention_days, config.sweep_interval.as_secs());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let sweeper = tokio::spawn(sweeper::run_retention_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(engine.clone(), config.compact_threshold));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    sweeper.abort();
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final WAL compaction failed: {e}");
    }
    info!("roombook stopped");
    Ok(())
}
