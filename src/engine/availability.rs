use std::time::Instant;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::tz;

use super::{Engine, EngineError, note_rejection};

// ── Interval algebra ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent periods into disjoint periods.
pub fn merge_overlapping(sorted: &[Period]) -> Vec<Period> {
    let mut merged: Vec<Period> = Vec::new();
    for &p in sorted {
        if let Some(last) = merged.last_mut()
            && p.start <= last.end
        {
            last.end = last.end.max(p.end);
            continue;
        }
        merged.push(p);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start and internally disjoint.
pub fn subtract_periods(base: &[Period], to_remove: &[Period]) -> Vec<Period> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut cursor = b.start;
        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }
        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = to_remove[j];
            if r.start > cursor {
                result.push(Period::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
            j += 1;
        }
        if cursor < b.end {
            result.push(Period::new(cursor, b.end));
        }
    }

    result
}

/// Fixed-stride slots inside `window`: a slot starts at every `stride` from
/// `window.start` and is kept while `start + session` still fits.
pub fn generate_slots(
    rule_id: Ulid,
    window: Period,
    session: Duration,
    stride: Duration,
) -> Vec<Slot> {
    let mut slots = Vec::new();
    if session <= Duration::zero() || stride <= Duration::zero() {
        return slots;
    }
    let mut start = window.start;
    while start < window.end && slots.len() < MAX_SLOTS_PER_DAY {
        let end = start + session;
        if end > window.end {
            break;
        }
        slots.push(Slot { rule_id, start, end });
        start += stride;
    }
    slots
}

/// The rule's working hours on each of its local dates that `day` touches,
/// clipped to `day`. Rule zones can sit far from the requester's, so a single
/// requested day may hit two rule-local dates, or none that match the rule's weekdays.
fn rule_windows_on(rule: &AvailabilityRule, zone: Tz, day: &Period) -> Vec<Period> {
    tz::local_dates_touched(zone, day)
        .into_iter()
        .filter(|d| rule.days.contains(d.weekday()))
        .filter_map(|d| {
            tz::local_window(zone, d, rule.available_start, rule.available_end).intersect(day)
        })
        .collect()
}

/// Does `rule` alone cover the booking window `[start, end)`?
fn accepts(rule: &AvailabilityRule, zone: Tz, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    if start < rule.valid_from || end > rule.valid_until {
        return false;
    }
    let local_start = start.with_timezone(&zone);
    let local_end = end.with_timezone(&zone);
    local_start.date_naive() == local_end.date_naive()
        && rule.days.contains(local_start.weekday())
        && rule.available_start <= local_start.time()
        && local_end.time() <= rule.available_end
}

fn rule_zone(rule: &AvailabilityRule) -> Option<Tz> {
    match tz::parse_tz(&rule.timezone) {
        Ok(zone) => Some(zone),
        Err(e) => {
            tracing::warn!("rule {} skipped: {e}", rule.id);
            None
        }
    }
}

impl Engine {
    /// Find the one ACTIVE rule that covers `[start, end)`.
    ///
    /// The window must already include session duration and buffer. More than
    /// one match means the no-overlap invariant was broken somewhere; that is
    /// reported as an internal error, not a validation failure.
    pub async fn validate_booking_availability(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Ulid, EngineError> {
        let result: Result<Ulid, EngineError> = async {
            if start >= end {
                return Err(EngineError::InvalidPeriod("booking start must be before end".into()));
            }
            let active = self.rules.find_by_status(RuleStatus::Active).await?;
            let matches: Vec<Ulid> = active
                .iter()
                .filter(|r| rule_zone(r).is_some_and(|zone| accepts(r, zone, start, end)))
                .map(|r| r.id)
                .collect();
            match matches.len() {
                0 => Err(EngineError::NoMatchingRule),
                1 => Ok(matches[0]),
                _ => {
                    metrics::counter!(crate::observability::AMBIGUOUS_MATCHES_TOTAL).increment(1);
                    Err(EngineError::AmbiguousMatch(matches))
                }
            }
        }
        .await;
        result.inspect_err(note_rejection)
    }

    /// Booking check for a catalogued session type starting at `start`.
    pub async fn check_session_booking(
        &self,
        session_type_id: Ulid,
        start: DateTime<Utc>,
    ) -> Result<Ulid, EngineError> {
        let session = self
            .session_types
            .session_type(session_type_id)
            .ok_or(EngineError::NotFound(session_type_id))
            .inspect_err(note_rejection)?;
        let end = start + Duration::minutes(i64::from(session.occupied_minutes()));
        self.validate_booking_availability(start, end).await
    }

    /// Candidate slots of `session_minutes` on `date` as seen from `timezone`,
    /// sorted by start.
    pub async fn compute_suggestions(
        &self,
        session_minutes: u32,
        date: NaiveDate,
        timezone: &str,
    ) -> Result<Vec<Slot>, EngineError> {
        let started = Instant::now();
        let result: Result<Vec<Slot>, EngineError> = async {
            if session_minutes == 0 || session_minutes > MAX_SESSION_MINUTES {
                return Err(EngineError::LimitExceeded("session length out of range"));
            }
            let requester = tz::parse_tz(timezone)?;
            let day = tz::day_bounds(requester, date)?;
            let settings = self.settings.booking_settings();
            let stride = Duration::minutes(i64::from(
                settings.slot_interval_minutes.max(MIN_SLOT_INTERVAL_MINUTES),
            ));
            let session = Duration::minutes(i64::from(session_minutes));
            let earliest =
                self.now() + Duration::minutes(i64::from(settings.minimum_notice_minutes));

            let active = self.rules.find_by_status(RuleStatus::Active).await?;
            let mut slots = Vec::new();
            for rule in active.iter().filter(|r| r.period().overlaps(&day)) {
                let Some(zone) = rule_zone(rule) else { continue };
                for window in rule_windows_on(rule, zone, &day) {
                    slots.extend(
                        generate_slots(rule.id, window, session, stride)
                            .into_iter()
                            .filter(|s| rule.period().contains(&s.period()))
                            .filter(|s| s.start >= earliest),
                    );
                }
            }
            slots.sort_by_key(|s| (s.start, s.rule_id));
            Ok(slots)
        }
        .await;
        metrics::histogram!(crate::observability::SUGGESTION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result.inspect_err(note_rejection)
    }

    /// Suggestions sized for a catalogued session type, buffer included.
    pub async fn suggest_for_session(
        &self,
        session_type_id: Ulid,
        date: NaiveDate,
        timezone: &str,
    ) -> Result<Vec<Slot>, EngineError> {
        let session = self
            .session_types
            .session_type(session_type_id)
            .ok_or(EngineError::NotFound(session_type_id))
            .inspect_err(note_rejection)?;
        self.compute_suggestions(session.occupied_minutes(), date, timezone)
            .await
    }

    /// Open hours on `date` with overrides applied: rule hours plus ACTIVE
    /// extensions, minus ACTIVE reductions. Disjoint and sorted.
    pub async fn open_windows(
        &self,
        date: NaiveDate,
        timezone: &str,
    ) -> Result<Vec<Period>, EngineError> {
        let result: Result<Vec<Period>, EngineError> = async {
            let day = tz::day_bounds(tz::parse_tz(timezone)?, date)?;

            let mut open = Vec::new();
            for rule in self.rules.find_by_status(RuleStatus::Active).await? {
                let Some(zone) = rule_zone(&rule) else { continue };
                open.extend(
                    rule_windows_on(&rule, zone, &day)
                        .into_iter()
                        .filter_map(|w| w.intersect(&rule.period())),
                );
            }

            let mut closed = Vec::new();
            for ov in self.overrides.find_overlapping_period(day, None).await? {
                if ov.status != OverrideStatus::Active {
                    continue;
                }
                let Some(clipped) = ov.period().intersect(&day) else { continue };
                if ov.is_extension {
                    open.push(clipped);
                } else {
                    closed.push(clipped);
                }
            }

            open.sort_by_key(|p| p.start);
            closed.sort_by_key(|p| p.start);
            Ok(subtract_periods(
                &merge_overlapping(&open),
                &merge_overlapping(&closed),
            ))
        }
        .await;
        result.inspect_err(note_rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, h, m, 0).unwrap()
    }

    fn p(sh: u32, sm: u32, eh: u32, em: u32) -> Period {
        Period::new(at(sh, sm), at(eh, em))
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday_rule(zone: &str, start: NaiveTime, end: NaiveTime) -> AvailabilityRule {
        AvailabilityRule {
            id: Ulid::new(),
            days: DaySet::from_iso(&[1]).unwrap(),
            available_start: start,
            available_end: end,
            valid_from: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
            valid_until: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
            timezone: zone.into(),
            utc_offset: String::new(),
            status: RuleStatus::Active,
        }
    }

    // ── generate_slots ────────────────────────────────────

    #[test]
    fn slots_fill_window_at_stride() {
        let slots = generate_slots(
            Ulid::new(),
            p(9, 0, 17, 0),
            Duration::minutes(60),
            Duration::minutes(60),
        );
        assert_eq!(slots.len(), 8);
        assert_eq!(slots[0].start, at(9, 0));
        assert_eq!(slots[7].end, at(17, 0));
    }

    #[test]
    fn slots_stop_when_session_no_longer_fits() {
        let slots = generate_slots(
            Ulid::new(),
            p(9, 0, 11, 0),
            Duration::minutes(45),
            Duration::minutes(30),
        );
        let starts: Vec<_> = slots.iter().map(|s| s.start).collect();
        // 09:00, 09:30, 10:00 fit; 10:30 + 45 min would end at 11:15.
        assert_eq!(starts, vec![at(9, 0), at(9, 30), at(10, 0)]);
        assert!(slots.iter().all(|s| s.end - s.start == Duration::minutes(45)));
    }

    #[test]
    fn slots_session_longer_than_window() {
        let slots = generate_slots(
            Ulid::new(),
            p(9, 0, 9, 30),
            Duration::minutes(60),
            Duration::minutes(15),
        );
        assert!(slots.is_empty());
    }

    #[test]
    fn slots_zero_stride_yields_nothing() {
        let slots = generate_slots(
            Ulid::new(),
            p(9, 0, 17, 0),
            Duration::minutes(30),
            Duration::zero(),
        );
        assert!(slots.is_empty());
    }

    // ── merge / subtract ──────────────────────────────────

    #[test]
    fn merge_joins_adjacent_and_overlapping() {
        let merged = merge_overlapping(&[
            p(9, 0, 10, 0),
            p(10, 0, 11, 0),
            p(10, 30, 12, 0),
            p(13, 0, 14, 0),
        ]);
        assert_eq!(merged, vec![p(9, 0, 12, 0), p(13, 0, 14, 0)]);
    }

    #[test]
    fn subtract_carves_hole() {
        let result = subtract_periods(&[p(9, 0, 17, 0)], &[p(12, 0, 13, 0)]);
        assert_eq!(result, vec![p(9, 0, 12, 0), p(13, 0, 17, 0)]);
    }

    #[test]
    fn subtract_full_cover() {
        let result = subtract_periods(&[p(9, 0, 10, 0)], &[p(8, 0, 11, 0)]);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_disjoint_keeps_base() {
        let base = vec![p(9, 0, 10, 0), p(11, 0, 12, 0)];
        let result = subtract_periods(&base, &[p(10, 0, 11, 0)]);
        assert_eq!(result, base);
    }

    // ── rule projection ───────────────────────────────────

    #[test]
    fn accepts_inside_hours_only() {
        let rule = monday_rule("UTC", t(9, 0), t(17, 0));
        let zone = tz::parse_tz("UTC").unwrap();
        assert!(accepts(&rule, zone, at(9, 0), at(10, 0)));
        assert!(accepts(&rule, zone, at(16, 0), at(17, 0)));
        assert!(!accepts(&rule, zone, at(16, 30), at(17, 30)));
        assert!(!accepts(&rule, zone, at(8, 30), at(9, 30)));
        // Tuesday
        let tue = Utc.with_ymd_and_hms(2026, 6, 2, 10, 0, 0).unwrap();
        assert!(!accepts(&rule, zone, tue, tue + Duration::hours(1)));
    }

    #[test]
    fn windows_for_far_zone_rule() {
        // Tokyo Monday 09:00–17:00 is Monday 00:00–08:00 UTC.
        let rule = monday_rule("Asia/Tokyo", t(9, 0), t(17, 0));
        let zone = tz::parse_tz("Asia/Tokyo").unwrap();
        let utc_monday = Period::new(at(0, 0), at(0, 0) + Duration::days(1));
        assert_eq!(rule_windows_on(&rule, zone, &utc_monday), vec![p(0, 0, 8, 0)]);

        // Seen from Los Angeles Monday (07:00 UTC Mon to 07:00 UTC Tue) only the
        // last hour of the Tokyo window remains.
        let la = tz::parse_tz("America/Los_Angeles").unwrap();
        let la_monday = tz::day_bounds(la, NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()).unwrap();
        assert_eq!(rule_windows_on(&rule, zone, &la_monday), vec![p(7, 0, 8, 0)]);
    }
}
