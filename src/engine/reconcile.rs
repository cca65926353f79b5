use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::model::*;
use crate::store::{Store, StoreError};

use super::{Engine, EngineError};

/// Archive every ACTIVE entity whose period ended before `now`.
///
/// Each record is re-read and saved under `gate`, so a concurrent delete or
/// update made after the expiry query wins. One failed save is logged and
/// skipped and the rest still go through. Only the initial query can fail the
/// sweep.
pub async fn archive_expired<T: Entity>(
    store: &dyn Store<T>,
    gate: &Mutex<()>,
    now: DateTime<Utc>,
) -> Result<Vec<Ulid>, StoreError> {
    let expired = store.find_active_ending_before(now).await?;
    let mut archived = Vec::with_capacity(expired.len());
    for candidate in expired {
        let id = candidate.id();
        let _gate = gate.lock().await;
        let mut entity = match store.find_by_id(id).await {
            Ok(Some(current)) if current.is_active() && current.period().end < now => current,
            Ok(_) => {
                tracing::debug!("{} {id} changed since expiry query, skipped", T::KIND);
                continue;
            }
            Err(e) => {
                tracing::warn!("failed to re-read {} {id}: {e}", T::KIND);
                metrics::counter!(crate::observability::SWEEP_FAILURES_TOTAL, "kind" => T::KIND)
                    .increment(1);
                continue;
            }
        };
        let ended = entity.period().end;
        entity.archive();
        match store.save(entity).await {
            Ok(()) => {
                tracing::info!("archived expired {} {id} (ended {ended})", T::KIND);
                archived.push(id);
            }
            Err(e) => {
                tracing::warn!("failed to archive {} {id}: {e}", T::KIND);
                metrics::counter!(crate::observability::SWEEP_FAILURES_TOTAL, "kind" => T::KIND)
                    .increment(1);
            }
        }
    }
    Ok(archived)
}

impl Engine {
    pub async fn archive_expired_rules(&self) -> Result<Vec<Ulid>, EngineError> {
        let archived = archive_expired::<AvailabilityRule>(
            self.rules.as_ref(),
            &self.write_gate,
            self.now(),
        )
        .await?;
        metrics::counter!(crate::observability::RULES_ARCHIVED_TOTAL)
            .increment(archived.len() as u64);
        Ok(archived)
    }

    pub async fn archive_expired_overrides(&self) -> Result<Vec<Ulid>, EngineError> {
        let archived = archive_expired::<AvailabilityOverride>(
            self.overrides.as_ref(),
            &self.write_gate,
            self.now(),
        )
        .await?;
        metrics::counter!(crate::observability::OVERRIDES_ARCHIVED_TOTAL)
            .increment(archived.len() as u64);
        Ok(archived)
    }
}
