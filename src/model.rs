use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open instant range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Touching edges do not overlap.
    pub fn overlaps(&self, other: &Period) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains_instant(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &Period) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersect(&self, other: &Period) -> Option<Period> {
        let clipped = Period::new(self.start.max(other.start), self.end.min(other.end));
        (!clipped.is_empty()).then_some(clipped)
    }
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Set of weekdays stored as a bitmask (bit 0 = Monday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DaySet(u8);

impl DaySet {
    pub const EMPTY: DaySet = DaySet(0);
    pub const ALL: DaySet = DaySet(0b0111_1111);

    /// Build from ISO weekday numbers (Mon=1..Sun=7). Returns `None` on anything out of range.
    pub fn from_iso(days: &[u8]) -> Option<Self> {
        let mut set = DaySet::EMPTY;
        for &d in days {
            let day = WEEK.get(usize::from(d).checked_sub(1)?)?;
            set.insert(*day);
        }
        Some(set)
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= Self::bit(day);
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub fn intersects(self, other: DaySet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        WEEK.into_iter().filter(move |d| self.contains(*d))
    }

    /// ISO numbers of the contained days, ascending.
    pub fn to_iso(self) -> Vec<u8> {
        self.iter().map(|d| d.number_from_monday() as u8).collect()
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleStatus {
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverrideStatus {
    Active,
    Archived,
}

/// A recurring weekly availability pattern valid for a bounded period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub days: DaySet,
    pub available_start: NaiveTime,
    pub available_end: NaiveTime,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// IANA identifier; local times are interpreted in this zone.
    pub timezone: String,
    /// Offset at `valid_from` when last saved. A cache, see
    /// [`AvailabilityRule::current_utc_offset`].
    pub utc_offset: String,
    pub status: RuleStatus,
}

impl AvailabilityRule {
    pub fn period(&self) -> Period {
        Period::new(self.valid_from, self.valid_until)
    }

    /// Offset of the rule's zone at `at`, recomputed rather than read from the cache.
    /// `None` if the stored zone no longer parses.
    pub fn current_utc_offset(&self, at: DateTime<Utc>) -> Option<String> {
        let tz = crate::tz::parse_tz(&self.timezone).ok()?;
        Some(crate::tz::format_offset(crate::tz::offset_at(tz, at)))
    }
}

/// Administrator input for creating or replacing a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    pub days: DaySet,
    pub available_start: NaiveTime,
    pub available_end: NaiveTime,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub timezone: String,
    pub status: RuleStatus,
}

impl NewRule {
    pub fn period(&self) -> Period {
        Period::new(self.valid_from, self.valid_until)
    }
}

/// A one-off adjustment confined to a single local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityOverride {
    pub id: Ulid,
    pub override_start: DateTime<Utc>,
    pub override_end: DateTime<Utc>,
    /// `true` opens extra hours, `false` closes existing ones.
    pub is_extension: bool,
    /// Frozen at creation.
    pub timezone: String,
    pub status: OverrideStatus,
}

impl AvailabilityOverride {
    pub fn period(&self) -> Period {
        Period::new(self.override_start, self.override_end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOverride {
    pub override_start: DateTime<Utc>,
    pub override_end: DateTime<Utc>,
    pub is_extension: bool,
}

/// A candidate bookable interval generated from one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub rule_id: Ulid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    pub fn period(&self) -> Period {
        Period::new(self.start, self.end)
    }
}

/// Anything the stores hold: identified, bounded in time, with a lifecycle status.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    type Status: Copy + PartialEq + Send + Sync + std::fmt::Debug;

    /// Short name used in logs and metric labels.
    const KIND: &'static str;

    fn id(&self) -> Ulid;
    fn period(&self) -> Period;
    fn status(&self) -> Self::Status;
    fn is_active(&self) -> bool;
    fn is_archived(&self) -> bool;
    fn archive(&mut self);
}

impl Entity for AvailabilityRule {
    type Status = RuleStatus;
    const KIND: &'static str = "rule";

    fn id(&self) -> Ulid {
        self.id
    }

    fn period(&self) -> Period {
        AvailabilityRule::period(self)
    }

    fn status(&self) -> RuleStatus {
        self.status
    }

    fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    fn is_archived(&self) -> bool {
        self.status == RuleStatus::Archived
    }

    fn archive(&mut self) {
        self.status = RuleStatus::Archived;
    }
}

impl Entity for AvailabilityOverride {
    type Status = OverrideStatus;
    const KIND: &'static str = "override";

    fn id(&self) -> Ulid {
        self.id
    }

    fn period(&self) -> Period {
        AvailabilityOverride::period(self)
    }

    fn status(&self) -> OverrideStatus {
        self.status
    }

    fn is_active(&self) -> bool {
        self.status == OverrideStatus::Active
    }

    fn is_archived(&self) -> bool {
        self.status == OverrideStatus::Archived
    }

    fn archive(&mut self) {
        self.status = OverrideStatus::Archived;
    }
}

/// WAL record format. One log per entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record<T> {
    Saved(T),
    Deleted(Ulid),
}
