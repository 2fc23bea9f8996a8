//! Daemon configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields a working daemon. The `timetable`, `devices` and
//! `users` sections seed the in-memory store on startup; deployments with a
//! real document store leave them empty.

use chrono::NaiveTime;
use presence_core::{DeviceId, Placement, TimetableSlot, User};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default TCP listen address for readers and dashboards.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7642";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {error}")]
    Read { path: String, error: String },

    #[error("failed to parse config file {path}: {error}")]
    Parse { path: String, error: String },
}

/// A reader device seeded from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSeed {
    /// Device identifier configured in firmware
    pub device_id: DeviceId,

    /// Room label (normalized on load)
    pub room: String,

    /// Mount placement
    pub placement: Placement,
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP address readers and dashboards connect to
    pub listen_addr: String,

    /// Owning organization stamped onto sessions and attendance
    pub organization_id: String,

    /// Daily opening time; scans before this are rejected as Closed
    pub day_open: NaiveTime,

    /// Daily closing time
    pub day_close: NaiveTime,

    /// Early-access window before the first slot of the day (minutes)
    pub early_access_minutes: i64,

    /// Free-access window after the last slot of the day (minutes)
    pub post_class_minutes: i64,

    /// How long a waiting slot survives without its teacher (minutes)
    pub teacher_grace_minutes: i64,

    /// Late-entry boundary: strictly more than this many minutes after the
    /// reference time is late
    pub late_threshold_minutes: i64,

    /// Points credited for a present record
    pub present_points: u32,

    /// Points credited for a late record
    pub late_points: u32,

    /// Trailing window before a break's end in which inside scans
    /// re-verify (minutes)
    pub re_verification_window_minutes: i64,

    /// Grace window after a break's end before the room rolls over (minutes)
    pub re_verification_grace_minutes: i64,

    /// One-shot warning this many minutes before a break ends
    pub break_warning_minutes: i64,

    /// Mode recomputation interval (seconds)
    pub mode_tick_secs: u64,

    /// Slot time-check interval (seconds)
    pub slot_tick_secs: u64,

    /// Expired/abandoned session sweep interval (seconds)
    pub sweep_interval_secs: u64,

    /// Grace before a waiting session is cancelled by the sweep (minutes)
    pub abandoned_grace_minutes: i64,

    /// Timetable rows seeded into the schedule resolver
    pub timetable: Vec<TimetableSlot>,

    /// Reader devices seeded into the device store
    pub devices: Vec<DeviceSeed>,

    /// Users seeded into the user store
    pub users: Vec<User>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            organization_id: "default".to_string(),
            day_open: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            day_close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            early_access_minutes: 30,
            post_class_minutes: 30,
            teacher_grace_minutes: 15,
            late_threshold_minutes: 5,
            present_points: 10,
            late_points: 5,
            re_verification_window_minutes: 10,
            re_verification_grace_minutes: 5,
            break_warning_minutes: 5,
            mode_tick_secs: 60,
            slot_tick_secs: 60,
            sweep_interval_secs: 300,
            abandoned_grace_minutes: 20,
            timetable: Vec::new(),
            devices: Vec::new(),
            users: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Late-entry boundary as a duration.
    pub fn late_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.late_threshold_minutes)
    }

    /// Teacher grace period as a duration.
    pub fn teacher_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.teacher_grace_minutes)
    }

    /// Early-access window as a duration.
    pub fn early_access(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.early_access_minutes)
    }

    /// Post-class free-access window as a duration.
    pub fn post_class(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.post_class_minutes)
    }

    /// Re-verification trailing window as a duration.
    pub fn re_verification_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.re_verification_window_minutes)
    }

    /// Post-break re-verification grace as a duration.
    pub fn re_verification_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.re_verification_grace_minutes)
    }

    /// Break warning lead time as a duration.
    pub fn break_warning(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.break_warning_minutes)
    }

    /// Abandoned-session grace as a duration.
    pub fn abandoned_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.abandoned_grace_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.late_threshold_minutes, 5);
        assert_eq!(config.present_points, 10);
        assert_eq!(config.late_points, 5);
        assert!(config.day_open < config.day_close);
        assert!(config.timetable.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: DaemonConfig = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:9000"
            teacher_grace_minutes = 10

            [[devices]]
            device_id = "reader-101-out"
            room = "Room 101"
            placement = "outside"
            "#,
        )
        .expect("parse");
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.teacher_grace_minutes, 10);
        // Untouched fields keep their defaults
        assert_eq!(config.late_threshold_minutes, 5);
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_timetable_section_parses() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [[timetable]]
            slot_ref = "slot-1"
            kind = "class"
            room = "r101"
            class_id = "10a"
            teacher_id = "t-1"
            subject_name = "Mathematics"
            start = "09:00:00"
            end = "09:45:00"
            "#,
        )
        .expect("parse");
        assert_eq!(config.timetable.len(), 1);
        assert_eq!(config.timetable[0].subject_name, "Mathematics");
    }
}
