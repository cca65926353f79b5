//! Timezone projection between UTC instants and local wall-clock values.
//!
//! Only the IANA identifier is ever stored; offsets are recomputed here from the
//! reference instant so that cached values cannot go stale across DST changes.

use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, Offset, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::Period;

pub fn parse_tz(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(name.to_string()))
}

pub fn offset_at(tz: Tz, at: DateTime<Utc>) -> FixedOffset {
    tz.offset_from_utc_datetime(&at.naive_utc()).fix()
}

/// `+HH:MM` rendering, e.g. `+05:30`, `-04:00`, `+00:00`.
pub fn format_offset(offset: FixedOffset) -> String {
    offset.to_string()
}

pub fn local_date(tz: Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

pub fn local_time(tz: Tz, at: DateTime<Utc>) -> NaiveTime {
    at.with_timezone(&tz).time()
}

pub fn weekday_at(tz: Tz, at: DateTime<Utc>) -> Weekday {
    at.with_timezone(&tz).weekday()
}

/// Human-readable local rendering used in error messages.
pub fn display_local(tz: Tz, at: DateTime<Utc>) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string()
}

/// Resolve a local wall-clock value to an instant.
///
/// Ambiguous times (fall back) take the earlier instant. Times inside a
/// spring-forward gap are shifted forward by the gap length.
pub fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => shift_out_of_gap(tz, naive),
    }
}

fn shift_out_of_gap(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    // Interpret with the offset in force before the transition; that instant
    // lands just past the gap.
    let before = naive - Duration::hours(24);
    let offset = tz
        .offset_from_local_datetime(&before)
        .earliest()
        .map(|o| o.fix())
        .unwrap_or_else(|| offset_at(tz, Utc.from_utc_datetime(&before)));
    let utc = naive - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&utc)
}

/// Instant bounds `[local midnight, next local midnight)` of `date` in `tz`.
pub fn day_bounds(tz: Tz, date: NaiveDate) -> Result<Period, EngineError> {
    let next = date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| EngineError::InvalidPeriod(format!("date {date} out of range")))?;
    Ok(Period::new(
        resolve_local(tz, date, NaiveTime::MIN),
        resolve_local(tz, next, NaiveTime::MIN),
    ))
}

/// Instant range of the local `[start, end)` wall-clock window on `date`.
pub fn local_window(tz: Tz, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Period {
    Period::new(resolve_local(tz, date, start), resolve_local(tz, date, end))
}

/// Every local calendar date in `tz` that the instant range touches, ascending.
pub fn local_dates_touched(tz: Tz, period: &Period) -> Vec<NaiveDate> {
    if period.is_empty() {
        return Vec::new();
    }
    let first = local_date(tz, period.start);
    let last = local_date(tz, period.end - Duration::nanoseconds(1));
    let mut dates = Vec::new();
    let mut cur = Some(first);
    while let Some(d) = cur {
        if d > last {
            break;
        }
        dates.push(d);
        cur = d.succ_opt();
    }
    dates
}
