use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use slotkeeper::clock::SystemClock;
use slotkeeper::config::Config;
use slotkeeper::engine::Engine;
use slotkeeper::model::{AvailabilityOverride, AvailabilityRule};
use slotkeeper::reaper;
use slotkeeper::settings::SessionTypeCatalog;
use slotkeeper::store::InMemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    slotkeeper::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let rules: Arc<InMemoryStore<AvailabilityRule>> =
        Arc::new(InMemoryStore::open(&config.data_dir.join("rules.wal"))?);
    let overrides: Arc<InMemoryStore<AvailabilityOverride>> =
        Arc::new(InMemoryStore::open(&config.data_dir.join("overrides.wal"))?);

    let engine = Arc::new(Engine::new(
        rules.clone(),
        overrides.clone(),
        Arc::new(config.booking.clone()),
        Arc::new(SessionTypeCatalog::new()),
        Arc::new(SystemClock),
    ));

    info!("slotkeeper started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  default timezone: {}", config.booking.default_timezone);
    info!("  slot interval: {} min", config.booking.slot_interval_minutes);
    info!(
        "  rule sweep every {:?}, override sweep every {:?}",
        config.rule_sweep_every, config.override_sweep_every
    );
    let metrics_url = config
        .metrics_port
        .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"));
    info!("  metrics: {metrics_url}");

    let tasks = [
        tokio::spawn(reaper::run_rule_reconciler(
            engine.clone(),
            config.rule_sweep_every,
        )),
        tokio::spawn(reaper::run_override_reconciler(
            engine.clone(),
            config.override_sweep_every,
        )),
        tokio::spawn(reaper::run_compactor(
            rules.clone(),
            config.compact_threshold,
        )),
        tokio::spawn(reaper::run_compactor(
            overrides.clone(),
            config.compact_threshold,
        )),
    ];

    // Graceful shutdown: stop the sweeps on SIGTERM/ctrl-c, then compact both logs
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, stopping background tasks");

    for task in &tasks {
        task.abort();
    }
    // Taking the write gate waits out any in-flight mutation.
    let _gate = engine.quiesce().await;
    if let Err(e) = rules.compact().await {
        tracing::warn!("final rule log compaction failed: {e}");
    }
    if let Err(e) = overrides.compact().await {
        tracing::warn!("final override log compaction failed: {e}");
    }

    info!("slotkeeper stopped");
    Ok(())
}
