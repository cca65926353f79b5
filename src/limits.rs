/// Upper bound on stored rules (all statuses).
pub const MAX_RULES: usize = 1_000;

/// Upper bound on stored overrides (all statuses).
pub const MAX_OVERRIDES: usize = 10_000;

/// An override never spans more than one day.
pub const MAX_OVERRIDE_DURATION_MINUTES: i64 = 24 * 60;

pub const MIN_SLOT_INTERVAL_MINUTES: u32 = 1;

pub const MAX_SESSION_MINUTES: u32 = 24 * 60;

/// One slot per minute of a day is the most a single rule window can produce.
pub const MAX_SLOTS_PER_DAY: usize = 24 * 60;

/// WAL records larger than this are treated as corruption on replay.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;
