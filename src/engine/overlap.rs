//! Overlap kernel shared by both validators.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::model::{AvailabilityRule, DaySet, NewRule, Period};
use crate::tz;

/// Half-open: touching edges do not overlap.
pub fn instant_ranges_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

pub fn days_intersect(a: DaySet, b: DaySet) -> bool {
    a.intersects(b)
}

/// Half-open on time of day. Ranges never wrap past midnight.
pub fn local_time_ranges_overlap(
    a_start: NaiveTime,
    a_end: NaiveTime,
    b_start: NaiveTime,
    b_end: NaiveTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// What a rule or override occupies: a period, the weekdays inside it, and a
/// local time-of-day range on each of those weekdays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyWindow {
    pub period: Period,
    pub days: DaySet,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WeeklyWindow {
    /// Two windows conflict only when period, weekday and local time all overlap.
    pub fn conflicts_with(&self, other: &WeeklyWindow) -> bool {
        instant_ranges_overlap(
            self.period.start,
            self.period.end,
            other.period.start,
            other.period.end,
        ) && days_intersect(self.days, other.days)
            && local_time_ranges_overlap(
                self.start_time,
                self.end_time,
                other.start_time,
                other.end_time,
            )
    }

    /// Window of a single-day override, read in its own zone.
    pub fn single_day(period: Period, zone: Tz) -> Self {
        Self {
            period,
            days: [tz::weekday_at(zone, period.start)].into_iter().collect(),
            start_time: tz::local_time(zone, period.start),
            end_time: tz::local_time(zone, period.end),
        }
    }
}

impl From<&AvailabilityRule> for WeeklyWindow {
    fn from(rule: &AvailabilityRule) -> Self {
        Self {
            period: rule.period(),
            days: rule.days,
            start_time: rule.available_start,
            end_time: rule.available_end,
        }
    }
}

impl From<&NewRule> for WeeklyWindow {
    fn from(rule: &NewRule) -> Self {
        Self {
            period: rule.period(),
            days: rule.days,
            start_time: rule.available_start,
            end_time: rule.available_end,
        }
    }
}
