use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::{MAX_OVERRIDE_DURATION_MINUTES, MAX_OVERRIDES};
use crate::model::*;
use crate::tz;

use super::overlap::WeeklyWindow;
use super::{Engine, EngineError, note_rejection};

/// Non-empty and contained in one local date of `zone`; returns that date.
fn check_single_local_day(zone: Tz, period: Period) -> Result<NaiveDate, EngineError> {
    if period.is_empty() {
        return Err(EngineError::InvalidPeriod(
            "override_start must be before override_end".into(),
        ));
    }
    let start_date = tz::local_date(zone, period.start);
    if start_date != tz::local_date(zone, period.end) {
        return Err(EngineError::InvalidPeriod(format!(
            "override spans two local dates ({} to {})",
            tz::display_local(zone, period.start),
            tz::display_local(zone, period.end),
        )));
    }
    Ok(start_date)
}

impl Engine {
    /// Extend/reduce consistency against ACTIVE rules.
    ///
    /// An extension must not touch hours a rule already opens; a reduction must
    /// carve out of hours at least one rule opens. The period must be non-empty
    /// and fall on one local date in `timezone`.
    pub async fn validate_override_consistency(
        &self,
        override_start: DateTime<Utc>,
        override_end: DateTime<Utc>,
        is_extension: bool,
        timezone: &str,
    ) -> Result<(), EngineError> {
        let zone = self.check_timezone(timezone, None).await?;
        let period = Period::new(override_start, override_end);
        check_single_local_day(zone, period)?;
        let window = WeeklyWindow::single_day(period, zone);

        let rules = self.rules.find_overlapping_period(period, None).await?;
        let mut hits = rules
            .iter()
            .filter(|r| r.status == RuleStatus::Active)
            .filter(|r| WeeklyWindow::from(*r).conflicts_with(&window));

        match (is_extension, hits.next()) {
            (true, Some(rule)) => Err(EngineError::ExtensionOverlapsRule(rule.id)),
            (false, None) => Err(EngineError::ReductionHasNoRuleToReduce),
            _ => Ok(()),
        }
    }

    /// Same-day, bounded-duration, not-in-the-past, no clash with another ACTIVE override.
    async fn check_override_bounds(
        &self,
        zone: Tz,
        period: Period,
    ) -> Result<(), EngineError> {
        if period.duration() > Duration::minutes(MAX_OVERRIDE_DURATION_MINUTES) {
            return Err(EngineError::InvalidPeriod(
                "override longer than 24 hours".into(),
            ));
        }
        let start_date = check_single_local_day(zone, period)?;
        let today = tz::local_date(zone, self.now());
        if start_date < today {
            return Err(EngineError::InvalidPeriod(format!(
                "override date {start_date} is in the past"
            )));
        }
        if let Some(clash) = self
            .overrides
            .find_overlapping_period(period, None)
            .await?
            .into_iter()
            .find(|o| o.status == OverrideStatus::Active)
        {
            return Err(EngineError::OverrideOverlap(clash.id));
        }
        Ok(())
    }

    /// The override's zone is the settings default at creation and never changes after.
    pub async fn create_override(
        &self,
        candidate: NewOverride,
    ) -> Result<AvailabilityOverride, EngineError> {
        let result: Result<AvailabilityOverride, EngineError> = async {
            let timezone = self.settings.booking_settings().default_timezone;
            let zone = tz::parse_tz(&timezone)?;
            let period = Period::new(candidate.override_start, candidate.override_end);

            let _gate = self.lock_writes().await;
            if self.overrides.count().await? >= MAX_OVERRIDES {
                return Err(EngineError::LimitExceeded("too many overrides"));
            }
            self.check_override_bounds(zone, period).await?;
            self.validate_override_consistency(
                candidate.override_start,
                candidate.override_end,
                candidate.is_extension,
                &timezone,
            )
            .await?;

            let ov = AvailabilityOverride {
                id: Ulid::new(),
                override_start: candidate.override_start,
                override_end: candidate.override_end,
                is_extension: candidate.is_extension,
                timezone,
                status: OverrideStatus::Active,
            };
            self.overrides.save(ov.clone()).await?;
            tracing::info!(
                "override {} created: {} {} to {}",
                ov.id,
                if ov.is_extension { "extension" } else { "reduction" },
                tz::display_local(zone, ov.override_start),
                tz::display_local(zone, ov.override_end),
            );
            Ok(ov)
        }
        .await;
        result.inspect_err(note_rejection)
    }

    pub async fn delete_override(&self, id: Ulid) -> Result<(), EngineError> {
        let result: Result<(), EngineError> = async {
            let _gate = self.lock_writes().await;
            if !self.overrides.delete_by_id(id).await? {
                return Err(EngineError::NotFound(id));
            }
            tracing::info!("override {id} deleted");
            Ok(())
        }
        .await;
        result.inspect_err(note_rejection)
    }
}
