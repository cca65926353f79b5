use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineError;
use crate::settings::BookingSettings;
use crate::tz;

/// Process configuration, read from `SLOTKEEPER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub booking: BookingSettings,
    pub rule_sweep_every: Duration,
    pub override_sweep_every: Duration,
    /// WAL appends before the compactor rewrites a log.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            booking: BookingSettings::default(),
            rule_sweep_every: Duration::from_secs(12 * 60 * 60),
            override_sweep_every: Duration::from_secs(60 * 60),
            compact_threshold: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults;
    /// an unknown default timezone is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let defaults = Config::default();
        let get = |name: &str| lookup(&format!("SLOTKEEPER_{name}"));
        let num = |name: &str, fallback: u64| -> u64 {
            get(name).and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };
        let minutes = |name: &str, fallback: u32| -> u32 {
            get(name).and_then(|s| s.parse().ok()).unwrap_or(fallback)
        };

        let booking = BookingSettings {
            slot_interval_minutes: minutes(
                "SLOT_INTERVAL_MINUTES",
                defaults.booking.slot_interval_minutes,
            ),
            minimum_notice_minutes: minutes(
                "MINIMUM_NOTICE_MINUTES",
                defaults.booking.minimum_notice_minutes,
            ),
            cancellation_notice_minutes: minutes(
                "CANCELLATION_NOTICE_MINUTES",
                defaults.booking.cancellation_notice_minutes,
            ),
            update_notice_minutes: minutes(
                "UPDATE_NOTICE_MINUTES",
                defaults.booking.update_notice_minutes,
            ),
            default_timezone: get("DEFAULT_TIMEZONE")
                .unwrap_or(defaults.booking.default_timezone),
        };
        tz::parse_tz(&booking.default_timezone)?;

        Ok(Self {
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            metrics_port: get("METRICS_PORT").and_then(|s| s.parse().ok()),
            booking,
            rule_sweep_every: Duration::from_secs(num(
                "RULE_SWEEP_SECS",
                defaults.rule_sweep_every.as_secs(),
            )),
            override_sweep_every: Duration::from_secs(num(
                "OVERRIDE_SWEEP_SECS",
                defaults.override_sweep_every.as_secs(),
            )),
            compact_threshold: num("COMPACT_THRESHOLD", defaults.compact_threshold),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("SLOTKEEPER_{k}"), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.rule_sweep_every, Duration::from_secs(43_200));
        assert_eq!(config.override_sweep_every, Duration::from_secs(3_600));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATA_DIR", "/var/lib/slotkeeper"),
            ("METRICS_PORT", "9100"),
            ("SLOT_INTERVAL_MINUTES", "15"),
            ("DEFAULT_TIMEZONE", "Europe/Berlin"),
            ("OVERRIDE_SWEEP_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/slotkeeper"));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.booking.slot_interval_minutes, 15);
        assert_eq!(config.booking.default_timezone, "Europe/Berlin");
        assert_eq!(config.override_sweep_every, Duration::from_secs(60));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("SLOT_INTERVAL_MINUTES", "soon"),
            ("METRICS_PORT", "99999"),
        ]))
        .unwrap();
        assert_eq!(config.booking.slot_interval_minutes, 30);
        assert_eq!(config.metrics_port, None);
    }

    #[test]
    fn bad_timezone_is_an_error() {
        let result = Config::from_lookup(lookup(&[("DEFAULT_TIMEZONE", "Nowhere/Special")]));
        assert!(matches!(result, Err(EngineError::InvalidTimezone(_))));
    }
}
