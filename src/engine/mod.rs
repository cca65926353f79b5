mod availability;
mod error;
mod overlap;
mod overrides;
mod queries;
mod reconcile;
mod rules;

pub use availability::{generate_slots, merge_overlapping, subtract_periods};
pub use error::EngineError;
pub use overlap::{
    WeeklyWindow, days_intersect, instant_ranges_overlap, local_time_ranges_overlap,
};
pub use reconcile::archive_expired;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::model::{AvailabilityOverride, AvailabilityRule};
use crate::settings::{SessionTypeProvider, SettingsProvider};
use crate::store::Store;

pub type RuleStore = dyn Store<AvailabilityRule>;
pub type OverrideStore = dyn Store<AvailabilityOverride>;

/// Availability engine for one calendar.
///
/// Validation and persistence of rules and overrides run under one write gate,
/// so the no-overlap invariants cannot be broken by two concurrent writers that
/// each validated against the same snapshot. Queries never take the gate.
pub struct Engine {
    pub(super) rules: Arc<RuleStore>,
    pub(super) overrides: Arc<OverrideStore>,
    pub(super) settings: Arc<dyn SettingsProvider>,
    pub(super) session_types: Arc<dyn SessionTypeProvider>,
    pub(super) clock: Arc<dyn Clock>,
    write_gate: Mutex<()>,
}

impl Engine {
    pub fn new(
        rules: Arc<RuleStore>,
        overrides: Arc<OverrideStore>,
        settings: Arc<dyn SettingsProvider>,
        session_types: Arc<dyn SessionTypeProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            overrides,
            settings,
            session_types,
            clock,
            write_gate: Mutex::new(()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn rule_store(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn override_store(&self) -> &Arc<OverrideStore> {
        &self.overrides
    }

    /// Serializes every validate-then-save sequence.
    pub(super) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    /// Block all mutations for as long as the guard lives. Used at shutdown.
    pub async fn quiesce(&self) -> MutexGuard<'_, ()> {
        self.lock_writes().await
    }
}

/// Log and count a rejected mutation or query. Internal failures are logged at error.
pub(super) fn note_rejection(err: &EngineError) {
    if err.is_internal() {
        tracing::error!("engine internal error: {err}");
    } else {
        tracing::debug!("rejected: {err}");
    }
    metrics::counter!(crate::observability::VALIDATION_REJECTIONS_TOTAL, "reason" => err.label())
        .increment(1);
}
