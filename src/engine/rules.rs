use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::MAX_RULES;
use crate::model::*;
use crate::tz;

use super::overlap::WeeklyWindow;
use super::{Engine, EngineError, note_rejection};

/// Field-level checks that need no store access.
fn check_shape(candidate: &NewRule) -> Result<(), EngineError> {
    if candidate.status == RuleStatus::Archived {
        return Err(EngineError::InvalidRule(
            "ARCHIVED is set by reconciliation only",
        ));
    }
    if candidate.available_start >= candidate.available_end {
        return Err(EngineError::InvalidRule(
            "available_start must be before available_end",
        ));
    }
    if candidate.status == RuleStatus::Active && candidate.days.is_empty() {
        return Err(EngineError::InvalidRule("an active rule needs at least one day"));
    }
    Ok(())
}

/// A rule may not straddle a DST transition: the offset at both ends must agree.
fn check_offset_drift(zone: Tz, candidate: &NewRule) -> Result<(), EngineError> {
    let at_start = tz::offset_at(zone, candidate.valid_from);
    let at_end = tz::offset_at(zone, candidate.valid_until);
    if at_start != at_end {
        return Err(EngineError::OffsetDrift {
            timezone: candidate.timezone.clone(),
            at_start: tz::format_offset(at_start),
            at_end: tz::format_offset(at_end),
        });
    }
    Ok(())
}

impl Engine {
    /// Every non-archived rule shares one zone; `timezone` must be it.
    pub(super) async fn check_timezone(
        &self,
        timezone: &str,
        exclude: Option<Ulid>,
    ) -> Result<Tz, EngineError> {
        let zone = tz::parse_tz(timezone)?;
        let live = self.rules.find_all_non_archived(exclude).await?;
        if let Some(other) = live.iter().find(|r| r.timezone != timezone) {
            return Err(EngineError::TimezoneMismatch {
                expected: other.timezone.clone(),
                found: timezone.to_string(),
                conflicting: other.id,
            });
        }
        Ok(zone)
    }

    /// The validity period must start now or later and be non-empty.
    fn check_period(&self, zone: Tz, candidate: &NewRule) -> Result<(), EngineError> {
        let now = self.now();
        if candidate.valid_from < now {
            return Err(EngineError::InvalidPeriod(format!(
                "valid_from {} is in the past (now {})",
                tz::display_local(zone, candidate.valid_from),
                tz::display_local(zone, now),
            )));
        }
        if candidate.valid_from >= candidate.valid_until {
            return Err(EngineError::InvalidPeriod(
                "valid_from must be before valid_until".into(),
            ));
        }
        Ok(())
    }

    /// One period query, then weekday and local-time filtering on the result.
    async fn check_active_overlap(
        &self,
        window: &WeeklyWindow,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let candidates = self
            .rules
            .find_overlapping_period(window.period, exclude)
            .await?;
        if let Some(hit) = candidates
            .iter()
            .filter(|r| r.status == RuleStatus::Active)
            .find(|r| WeeklyWindow::from(*r).conflicts_with(window))
        {
            return Err(EngineError::RuleOverlap(hit.id));
        }
        Ok(())
    }

    /// Gate a new or updated rule. `exclude` is the rule's own id on update.
    /// Overlap is only checked when the candidate would be ACTIVE.
    pub async fn validate_rule(
        &self,
        candidate: &NewRule,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        check_shape(candidate)?;
        let zone = self.check_timezone(&candidate.timezone, exclude).await?;
        self.check_period(zone, candidate)?;
        check_offset_drift(zone, candidate)?;
        if candidate.status == RuleStatus::Active {
            self.check_active_overlap(&WeeklyWindow::from(candidate), exclude)
                .await?;
        }
        Ok(())
    }

    fn materialize(id: Ulid, candidate: NewRule) -> Result<AvailabilityRule, EngineError> {
        let zone = tz::parse_tz(&candidate.timezone)?;
        Ok(AvailabilityRule {
            id,
            days: candidate.days,
            available_start: candidate.available_start,
            available_end: candidate.available_end,
            valid_from: candidate.valid_from,
            valid_until: candidate.valid_until,
            utc_offset: tz::format_offset(tz::offset_at(zone, candidate.valid_from)),
            timezone: candidate.timezone,
            status: candidate.status,
        })
    }

    pub async fn create_rule(&self, candidate: NewRule) -> Result<AvailabilityRule, EngineError> {
        let result: Result<AvailabilityRule, EngineError> = async {
            let _gate = self.lock_writes().await;
            if self.rules.count().await? >= MAX_RULES {
                return Err(EngineError::LimitExceeded("too many rules"));
            }
            self.validate_rule(&candidate, None).await?;
            let rule = Self::materialize(Ulid::new(), candidate)?;
            self.rules.save(rule.clone()).await?;
            tracing::info!(
                "rule {} created: days {:?} {}-{} {} [{}, {}) {:?}",
                rule.id,
                rule.days.to_iso(),
                rule.available_start,
                rule.available_end,
                rule.timezone,
                rule.valid_from,
                rule.valid_until,
                rule.status
            );
            Ok(rule)
        }
        .await;
        result.inspect_err(note_rejection)
    }

    /// Replace every field of an existing rule. Archived rules are read-only.
    pub async fn update_rule(
        &self,
        id: Ulid,
        candidate: NewRule,
    ) -> Result<AvailabilityRule, EngineError> {
        let result: Result<AvailabilityRule, EngineError> = async {
            let _gate = self.lock_writes().await;
            let existing = self
                .rules
                .find_by_id(id)
                .await?
                .ok_or(EngineError::NotFound(id))?;
            if existing.status == RuleStatus::Archived {
                return Err(EngineError::InvalidRule("archived rules are read-only"));
            }
            self.validate_rule(&candidate, Some(id)).await?;
            let rule = Self::materialize(id, candidate)?;
            self.rules.save(rule.clone()).await?;
            tracing::info!("rule {id} updated");
            Ok(rule)
        }
        .await;
        result.inspect_err(note_rejection)
    }

    /// Administrative ACTIVE/INACTIVE toggle.
    ///
    /// Activation re-runs the zone and overlap checks against the current set but
    /// not the past-start check: the period was vetted when it was written.
    pub async fn set_rule_status(
        &self,
        id: Ulid,
        status: RuleStatus,
    ) -> Result<AvailabilityRule, EngineError> {
        let result: Result<AvailabilityRule, EngineError> = async {
            if status == RuleStatus::Archived {
                return Err(EngineError::InvalidRule(
                    "ARCHIVED is set by reconciliation only",
                ));
            }
            let _gate = self.lock_writes().await;
            let mut rule = self
                .rules
                .find_by_id(id)
                .await?
                .ok_or(EngineError::NotFound(id))?;
            if rule.status == RuleStatus::Archived {
                return Err(EngineError::InvalidRule("archived rules are read-only"));
            }
            if rule.status == status {
                return Ok(rule);
            }
            if status == RuleStatus::Active {
                if rule.days.is_empty() {
                    return Err(EngineError::InvalidRule("an active rule needs at least one day"));
                }
                if rule.valid_until <= self.now() {
                    return Err(EngineError::InvalidPeriod(format!(
                        "rule ended at {}",
                        rule.valid_until
                    )));
                }
                self.check_timezone(&rule.timezone, Some(id)).await?;
                self.check_active_overlap(&WeeklyWindow::from(&rule), Some(id))
                    .await?;
            }
            rule.status = status;
            self.rules.save(rule.clone()).await?;
            tracing::info!("rule {id} set to {status:?}");
            Ok(rule)
        }
        .await;
        result.inspect_err(note_rejection)
    }

    pub async fn delete_rule(&self, id: Ulid) -> Result<(), EngineError> {
        let result: Result<(), EngineError> = async {
            let _gate = self.lock_writes().await;
            if !self.rules.delete_by_id(id).await? {
                return Err(EngineError::NotFound(id));
            }
            tracing::info!("rule {id} deleted");
            Ok(())
        }
        .await;
        result.inspect_err(note_rejection)
    }
}
