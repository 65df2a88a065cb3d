//! Environment-driven configuration for the POS coordination core.
//!
//! Every tunable named in the specification gets an environment variable
//! and a documented default, read once at process start by `pos-server`.
//! Audit and notification settings live in their owning crates'
//! `AuditConfig::from_env`/`NotificationConfig::from_env`; this struct
//! collects everything else: the listen address, the concurrency
//! manager's lock timeout, and the reservation policy.

use std::time::Duration;

use pos_reservation::ReservationSettings;

/// Process-wide configuration, collected from the environment at startup.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// HTTP/WebSocket listen address, e.g. `0.0.0.0:8080`.
    pub listen_addr: String,
    /// Seconds an editing lease is held before it expires automatically.
    pub lock_timeout_secs: u64,
    /// Minimum hours of advance notice a reservation requires.
    pub min_advance_hours: i64,
    /// Maximum days in the future a reservation can be booked.
    pub max_advance_days: i64,
    /// Interval, in minutes, between generated reservation availability slots.
    pub slot_duration_minutes: i64,
    /// Minutes after a booked time before a no-show sweep fires.
    pub no_show_grace_minutes: i64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|value| value.parse().ok()).unwrap_or(default)
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            lock_timeout_secs: 300,
            min_advance_hours: 1,
            max_advance_days: 30,
            slot_duration_minutes: 15,
            no_show_grace_minutes: 15,
        }
    }
}

impl CoreConfig {
    /// Load configuration from the environment, falling back to the
    /// documented default for any variable that isn't set or doesn't parse.
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(default.listen_addr),
            lock_timeout_secs: env_or("LOCK_TIMEOUT_SECS", default.lock_timeout_secs),
            min_advance_hours: env_or("MIN_ADVANCE_HOURS", default.min_advance_hours),
            max_advance_days: env_or("MAX_ADVANCE_DAYS", default.max_advance_days),
            slot_duration_minutes: env_or("SLOT_DURATION_MINUTES", default.slot_duration_minutes),
            no_show_grace_minutes: env_or("NO_SHOW_GRACE_MINUTES", default.no_show_grace_minutes),
        }
    }

    /// Editing lease timeout as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Build a [`ReservationSettings`] from the reservation-policy fields,
    /// leaving everything else (capacity, hours, confirmation policy) at
    /// its documented default.
    #[must_use]
    pub fn reservation_settings(&self) -> ReservationSettings {
        ReservationSettings {
            min_advance_hours: self.min_advance_hours,
            max_advance_days: self.max_advance_days,
            no_show_grace_minutes: self.no_show_grace_minutes,
            slot_duration_minutes: self.slot_duration_minutes,
            ..ReservationSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.lock_timeout_secs, 300);
        assert_eq!(config.min_advance_hours, 1);
        assert_eq!(config.max_advance_days, 30);
        assert_eq!(config.no_show_grace_minutes, 15);
    }

    #[test]
    fn reservation_settings_carries_the_configured_policy_fields() {
        let config = CoreConfig { min_advance_hours: 2, max_advance_days: 14, ..CoreConfig::default() };
        let settings = config.reservation_settings();
        assert_eq!(settings.min_advance_hours, 2);
        assert_eq!(settings.max_advance_days, 14);
    }
}
