use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    InvalidTimezone(String),
    /// Candidate zone disagrees with the zone every non-archived rule shares.
    TimezoneMismatch {
        expected: String,
        found: String,
        conflicting: Ulid,
    },
    /// The zone's offset at `valid_from` differs from the one at `valid_until`.
    OffsetDrift {
        timezone: String,
        at_start: String,
        at_end: String,
    },
    InvalidPeriod(String),
    InvalidRule(&'static str),
    RuleOverlap(Ulid),
    ExtensionOverlapsRule(Ulid),
    ReductionHasNoRuleToReduce,
    OverrideOverlap(Ulid),
    NoMatchingRule,
    /// More than one ACTIVE rule accepted a booking window. Never user-facing.
    AmbiguousMatch(Vec<Ulid>),
    LimitExceeded(&'static str),
    Store(String),
}

impl EngineError {
    /// Internal failures surface as a generic server error; everything else is
    /// a rejected input the caller can correct.
    pub fn is_internal(&self) -> bool {
        matches!(self, EngineError::AmbiguousMatch(_) | EngineError::Store(_))
    }

    /// Short stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTimezone(_) => "invalid_timezone",
            EngineError::TimezoneMismatch { .. } => "timezone_mismatch",
            EngineError::OffsetDrift { .. } => "offset_drift",
            EngineError::InvalidPeriod(_) => "invalid_period",
            EngineError::InvalidRule(_) => "invalid_rule",
            EngineError::RuleOverlap(_) => "rule_overlap",
            EngineError::ExtensionOverlapsRule(_) => "extension_overlaps_rule",
            EngineError::ReductionHasNoRuleToReduce => "reduction_has_no_rule",
            EngineError::OverrideOverlap(_) => "override_overlap",
            EngineError::NoMatchingRule => "no_matching_rule",
            EngineError::AmbiguousMatch(_) => "ambiguous_match",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Store(_) => "store",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidTimezone(tz) => write!(f, "invalid timezone: {tz}"),
            EngineError::TimezoneMismatch {
                expected,
                found,
                conflicting,
            } => write!(
                f,
                "timezone {found} does not match {expected} used by rule {conflicting}"
            ),
            EngineError::OffsetDrift {
                timezone,
                at_start,
                at_end,
            } => write!(
                f,
                "period crosses a DST transition in {timezone}: offset {at_start} at start, {at_end} at end"
            ),
            EngineError::InvalidPeriod(msg) => write!(f, "invalid period: {msg}"),
            EngineError::InvalidRule(msg) => write!(f, "invalid rule: {msg}"),
            EngineError::RuleOverlap(id) => write!(f, "overlaps active rule {id}"),
            EngineError::ExtensionOverlapsRule(id) => {
                write!(f, "extension overlaps hours already open by rule {id}")
            }
            EngineError::ReductionHasNoRuleToReduce => {
                write!(f, "reduction does not overlap any active rule")
            }
            EngineError::OverrideOverlap(id) => write!(f, "overlaps active override {id}"),
            EngineError::NoMatchingRule => write!(f, "no active rule covers the requested window"),
            EngineError::AmbiguousMatch(ids) => {
                write!(f, "internal error: {} active rules match one window", ids.len())
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e.to_string())
    }
}
