//! Configuration schema
//!
//! Mirrors the YAML document mounted into the controller pod (or stored in
//! its ConfigMap). Field names are camelCase on the wire.

use std::time::Duration;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_START_TIME: &str = "09:00";
pub const DEFAULT_END_TIME: &str = "17:00";
pub const DEFAULT_TIME_ZONE: &str = "UTC";
pub const DEFAULT_SYNC_INTERVAL: &str = "1h";
pub const DEFAULT_CACHE_DAYS: u32 = 7;
pub const DEFAULT_CREDENTIALS_PATH: &str = "/etc/google/credentials.json";

/// Top-level configuration: when to work, and which pools to scale
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub schedule: WorkSchedule,
    #[serde(default)]
    pub node_specs: Vec<NodeSpec>,
}

/// Days of the week on which the static window applies
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkDays {
    #[serde(default = "default_true")]
    pub monday: bool,
    #[serde(default = "default_true")]
    pub tuesday: bool,
    #[serde(default = "default_true")]
    pub wednesday: bool,
    #[serde(default = "default_true")]
    pub thursday: bool,
    #[serde(default = "default_true")]
    pub friday: bool,
    #[serde(default)]
    pub saturday: bool,
    #[serde(default)]
    pub sunday: bool,
}

impl Default for WorkDays {
    fn default() -> Self {
        Self {
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: false,
            sunday: false,
        }
    }
}

impl WorkDays {
    /// Whether `day` is a configured work day
    pub fn contains(&self, day: Weekday) -> bool {
        match day {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    pub fn enabled_days(&self) -> Vec<Weekday> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter(|d| self.contains(*d))
        .collect()
    }
}

/// When the cluster should run at full capacity
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkSchedule {
    /// Start of the daily window, "HH:MM"
    #[serde(default = "default_start_time")]
    pub start_time: String,
    /// End of the daily window, "HH:MM"
    #[serde(default = "default_end_time")]
    pub end_time: String,
    /// IANA zone name, e.g. "America/New_York"
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default)]
    pub work_days: WorkDays,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_calendar: Option<GoogleCalendarConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ics_calendar: Option<IcsCalendarConfig>,
}

impl Default for WorkSchedule {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            end_time: default_end_time(),
            time_zone: default_time_zone(),
            work_days: WorkDays::default(),
            google_calendar: None,
            ics_calendar: None,
        }
    }
}

impl WorkSchedule {
    /// True when the fixed clock window is fully specified
    pub fn has_static_window(&self) -> bool {
        !self.start_time.is_empty() && !self.end_time.is_empty() && !self.time_zone.is_empty()
    }
}

/// Google Calendar integration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCalendarConfig {
    pub calendar_id: String,
    /// Mounted service-account key file
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,
    /// Free-text query selecting the events that mark off-time
    #[serde(default)]
    pub off_time_events: String,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
    /// How many days ahead to cache
    #[serde(default = "default_cache_days")]
    pub cache_days: u32,
}

impl GoogleCalendarConfig {
    pub fn sync_interval(&self) -> Result<Duration> {
        parse_sync_interval(&self.sync_interval)
    }
}

/// ICS feed integration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IcsCalendarConfig {
    pub url: String,
    /// Labels matching any of these are work days
    #[serde(default)]
    pub work_day_patterns: Vec<String>,
    /// Labels matching any of these are holidays; checked first
    #[serde(default)]
    pub holiday_patterns: Vec<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
    /// Zone for all-day and floating dates; defaults to the schedule zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl IcsCalendarConfig {
    pub fn sync_interval(&self) -> Result<Duration> {
        parse_sync_interval(&self.sync_interval)
    }
}

/// Scaling behaviour for one node pool
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub node_pool_name: String,
    /// "gke", "aws" or "azure"
    pub cloud_provider: String,
    /// Nodes to keep during off-hours
    #[serde(default)]
    pub off_time_count: i32,
}

/// Parse a Go-style duration such as "1h" or "90s"
pub fn parse_sync_interval(value: &str) -> Result<Duration> {
    let value = if value.is_empty() {
        DEFAULT_SYNC_INTERVAL
    } else {
        value
    };
    let interval = duration_str::parse(value)
        .map_err(|e| Error::ConfigError(format!("invalid sync interval {value:?}: {e}")))?;
    if interval.is_zero() {
        return Err(Error::ConfigError(format!(
            "sync interval {value:?} must be greater than zero"
        )));
    }
    Ok(interval)
}

fn default_true() -> bool {
    true
}

fn default_start_time() -> String {
    DEFAULT_START_TIME.to_string()
}

fn default_end_time() -> String {
    DEFAULT_END_TIME.to_string()
}

fn default_time_zone() -> String {
    DEFAULT_TIME_ZONE.to_string()
}

fn default_sync_interval() -> String {
    DEFAULT_SYNC_INTERVAL.to_string()
}

fn default_cache_days() -> u32 {
    DEFAULT_CACHE_DAYS
}

fn default_credentials_path() -> String {
    DEFAULT_CREDENTIALS_PATH.to_string()
}
