use dashmap::DashMap;
use ulid::Ulid;

/// Singleton booking configuration. Owned elsewhere; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSettings {
    /// Stride between consecutive suggested slot starts.
    pub slot_interval_minutes: u32,
    /// Suggestions starting sooner than this from now are dropped.
    pub minimum_notice_minutes: u32,
    pub cancellation_notice_minutes: u32,
    pub update_notice_minutes: u32,
    /// IANA zone stamped on new overrides.
    pub default_timezone: String,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            slot_interval_minutes: 30,
            minimum_notice_minutes: 0,
            cancellation_notice_minutes: 24 * 60,
            update_notice_minutes: 24 * 60,
            default_timezone: "UTC".into(),
        }
    }
}

pub trait SettingsProvider: Send + Sync {
    fn booking_settings(&self) -> BookingSettings;
}

/// Fixed settings, e.g. loaded once from the environment.
impl SettingsProvider for BookingSettings {
    fn booking_settings(&self) -> BookingSettings {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionType {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    /// Gap kept free after each session.
    pub buffer_minutes: u32,
}

impl SessionType {
    /// Minutes a booking of this type occupies on the calendar.
    pub fn occupied_minutes(&self) -> u32 {
        self.duration_minutes + self.buffer_minutes
    }
}

pub trait SessionTypeProvider: Send + Sync {
    fn session_type(&self, id: Ulid) -> Option<SessionType>;
}

/// In-process session-type lookup.
#[derive(Debug, Default)]
pub struct SessionTypeCatalog {
    types: DashMap<Ulid, SessionType>,
}

impl SessionTypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_type: SessionType) {
        self.types.insert(session_type.id, session_type);
    }

    pub fn remove(&self, id: &Ulid) -> Option<SessionType> {
        self.types.remove(id).map(|(_, t)| t)
    }
}

impl SessionTypeProvider for SessionTypeCatalog {
    fn session_type(&self, id: Ulid) -> Option<SessionType> {
        self.types.get(&id).map(|e| e.value().clone())
    }
}
