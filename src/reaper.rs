use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::engine::Engine;
use crate::model::Entity;
use crate::store::InMemoryStore;

/// Background task that archives ACTIVE rules whose validity period has ended.
/// Runs once immediately, then every `every`.
pub async fn run_rule_reconciler(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match engine.archive_expired_rules().await {
            Ok(ids) if ids.is_empty() => tracing::debug!("rule sweep: nothing expired"),
            Ok(ids) => info!("rule sweep archived {} rules", ids.len()),
            Err(e) => tracing::warn!("rule sweep failed: {e}"),
        }
    }
}

/// Background task that archives ACTIVE overrides whose end has passed.
pub async fn run_override_reconciler(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match engine.archive_expired_overrides().await {
            Ok(ids) if ids.is_empty() => tracing::debug!("override sweep: nothing expired"),
            Ok(ids) => info!("override sweep archived {} overrides", ids.len()),
            Err(e) => tracing::warn!("override sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites a store's log once enough appends pile up.
pub async fn run_compactor<T: Entity>(store: Arc<InMemoryStore<T>>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted {} log after {appends} appends", T::KIND),
            Err(e) => tracing::error!("{} log compaction failed: {e}", T::KIND),
        }
    }
}
