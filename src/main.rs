use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use office_booker::audit::TracingAudit;
use office_booker::booking::BookingService;
use office_booker::config::Config;
use office_booker::dates::Clock;
use office_booker::engine::Engine;
use office_booker::model::User;
use office_booker::notify::LogTransport;
use office_booker::users::ConfigUserDirectory;
use office_booker::{observability, reaper, restore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(Config::from_env()?);
    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("office-booker.wal");
    let engine = Arc::new(Engine::open(&wal_path, config.data_retention_days)?);

    info!("office-booker started");
    info!("  env: {}", config.env);
    info!("  data_dir: {}", config.data_dir.display());
    info!("  offices: {}", config.office_quotas.len());
    info!("  advance_booking_days: {}", config.advance_booking_days);
    info!("  data_retention_days: {}", config.data_retention_days);
    info!("  reap_interval_secs: {}", config.reap_interval_secs);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    if let Some(path) = &config.restore_file {
        let service = BookingService::with_engine(
            config.clone(),
            engine.clone(),
            Arc::new(ConfigUserDirectory::new(&config)),
            Arc::new(LogTransport),
            Arc::new(TracingAudit),
        );
        let mut system = User::new("system@office-booker", u32::MAX);
        system.permissions.can_manage_all_bookings = true;
        info!("restoring bookings from {}", path.display());
        restore::restore_file(&service, &system, path).await?;
    }

    let reap_every = Duration::from_secs(config.reap_interval_secs);
    let reaper_engine = engine.clone();
    tokio::spawn(async move {
        reaper::run_reaper(reaper_engine, Clock::System, reap_every).await;
    });
    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        reaper::run_compactor(compactor_engine, threshold).await;
    });

    shutdown_signal().await?;
    info!("shutdown signal received");

    // Leave a short log behind for the next start.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("office-booker stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
