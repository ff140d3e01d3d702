//! Reading and validating configuration documents

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveTime;
use chrono_tz::Tz;
use regex::Regex;
use tracing::debug;

use super::types::*;
use crate::error::{Error, Result};

/// Parse, default and validate a YAML configuration document
pub fn read_config_from_str(data: &str) -> Result<Config> {
    let mut cfg: Config = serde_yaml::from_str(data)?;
    apply_defaults(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

/// Read a configuration file from disk
pub fn read_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    debug!("Reading configuration from {}", path.display());
    let data = std::fs::read_to_string(path).map_err(|e| {
        Error::ConfigError(format!("failed to read config file {}: {e}", path.display()))
    })?;
    read_config_from_str(&data)
}

/// Explicitly empty strings fall back to the same defaults as absent keys.
fn apply_defaults(cfg: &mut Config) {
    let schedule = &mut cfg.schedule;
    if schedule.start_time.is_empty() {
        schedule.start_time = DEFAULT_START_TIME.to_string();
    }
    if schedule.end_time.is_empty() {
        schedule.end_time = DEFAULT_END_TIME.to_string();
    }
    if schedule.time_zone.is_empty() {
        schedule.time_zone = DEFAULT_TIME_ZONE.to_string();
    }
    if let Some(google) = schedule.google_calendar.as_mut() {
        if google.credentials_path.is_empty() {
            google.credentials_path = DEFAULT_CREDENTIALS_PATH.to_string();
        }
        if google.sync_interval.is_empty() {
            google.sync_interval = DEFAULT_SYNC_INTERVAL.to_string();
        }
        if google.cache_days == 0 {
            google.cache_days = DEFAULT_CACHE_DAYS;
        }
    }
    if let Some(ics) = schedule.ics_calendar.as_mut() {
        if ics.sync_interval.is_empty() {
            ics.sync_interval = DEFAULT_SYNC_INTERVAL.to_string();
        }
    }
}

/// Check a configuration for the errors that are fatal at startup
pub fn validate(cfg: &Config) -> Result<()> {
    let schedule = &cfg.schedule;

    if !schedule.has_static_window() && schedule.google_calendar.is_none() {
        return Err(Error::ConfigError(
            "no valid schedule configuration provided".to_string(),
        ));
    }

    if schedule.has_static_window() {
        parse_clock(&schedule.start_time)?;
        parse_clock(&schedule.end_time)?;
        parse_time_zone(&schedule.time_zone)?;
    }

    if let Some(google) = &schedule.google_calendar {
        if google.calendar_id.is_empty() {
            return Err(Error::ConfigError(
                "calendar ID is required for google calendar schedule".to_string(),
            ));
        }
        if google.credentials_path.is_empty() {
            return Err(Error::ConfigError(
                "credentials file is required for google calendar schedule".to_string(),
            ));
        }
        google.sync_interval()?;
    }

    if let Some(ics) = &schedule.ics_calendar {
        if ics.url.is_empty() {
            return Err(Error::ConfigError(
                "url is required for ics calendar schedule".to_string(),
            ));
        }
        ics.sync_interval()?;
        compile_patterns("work day", &ics.work_day_patterns)?;
        compile_patterns("holiday", &ics.holiday_patterns)?;
        if let Some(zone) = &ics.time_zone {
            parse_time_zone(zone)?;
        }
    }

    let mut seen = HashSet::new();
    for (i, spec) in cfg.node_specs.iter().enumerate() {
        if spec.node_pool_name.is_empty() {
            return Err(Error::ConfigError(format!(
                "node pool name is required for spec {i}"
            )));
        }
        if spec.cloud_provider.is_empty() {
            return Err(Error::ConfigError(format!(
                "cloud provider is required for spec {i}"
            )));
        }
        if spec.off_time_count < 0 {
            return Err(Error::ConfigError(format!(
                "invalid off-time node count for spec {i}"
            )));
        }
        if !seen.insert(spec.node_pool_name.as_str()) {
            return Err(Error::ConfigError(format!(
                "duplicate node pool name {:?} in spec {i}",
                spec.node_pool_name
            )));
        }
    }

    Ok(())
}

/// Parse an "HH:MM" clock value
pub fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| Error::InvalidTimeFormat(value.to_string()))
}

/// Resolve an IANA time zone name
pub fn parse_time_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::InvalidTimeZone(name.to_string()))
}

/// Compile calendar label patterns, naming the offending one on failure
pub fn compile_patterns(kind: &'static str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| Error::InvalidPattern {
                kind,
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_to_minimal_document() {
        let cfg = read_config_from_str("nodeSpecs: []\n").unwrap();
        assert_eq!(cfg.schedule.start_time, "09:00");
        assert_eq!(cfg.schedule.end_time, "17:00");
        assert_eq!(cfg.schedule.time_zone, "UTC");
        assert_eq!(cfg.schedule.work_days, WorkDays::default());
        assert!(cfg.schedule.google_calendar.is_none());
    }

    #[test]
    fn test_empty_strings_fall_back_to_defaults() {
        let yaml = r#"
schedule:
  startTime: ""
  timeZone: ""
  googleCalendar:
    calendarId: team@example.com
    credentialsPath: ""
"#;
        let cfg = read_config_from_str(yaml).unwrap();
        assert_eq!(cfg.schedule.start_time, "09:00");
        assert_eq!(cfg.schedule.time_zone, "UTC");
        let google = cfg.schedule.google_calendar.unwrap();
        assert_eq!(google.credentials_path, DEFAULT_CREDENTIALS_PATH);
        assert_eq!(google.sync_interval, "1h");
        assert_eq!(google.cache_days, 7);
    }

    #[test]
    fn test_rejects_bad_time_values() {
        let err = read_config_from_str("schedule:\n  startTime: \"9am\"\n").unwrap_err();
        assert!(matches!(err, Error::InvalidTimeFormat(_)));

        let err = read_config_from_str("schedule:\n  timeZone: Mars/Olympus\n").unwrap_err();
        assert!(matches!(err, Error::InvalidTimeZone(_)));
    }

    #[test]
    fn test_rejects_bad_node_specs() {
        let negative = r#"
nodeSpecs:
  - nodePoolName: pool-a
    cloudProvider: gke
    offTimeCount: -1
"#;
        assert!(read_config_from_str(negative).is_err());

        let missing_provider = r#"
nodeSpecs:
  - nodePoolName: pool-a
    cloudProvider: ""
"#;
        assert!(read_config_from_str(missing_provider).is_err());
    }

    #[test]
    fn test_rejects_duplicate_pool_names() {
        let yaml = r#"
nodeSpecs:
  - nodePoolName: pool-a
    cloudProvider: gke
    offTimeCount: 1
  - nodePoolName: pool-a
    cloudProvider: aws
    offTimeCount: 0
"#;
        let err = read_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate node pool name"));
    }

    #[test]
    fn test_rejects_invalid_ics_patterns() {
        let yaml = r#"
schedule:
  icsCalendar:
    url: http://example.com/cal.ics
    holidayPatterns: ["[invalid"]
"#;
        let err = read_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("Invalid holiday pattern"));
    }

    #[test]
    fn test_google_calendar_requires_id() {
        let yaml = r#"
schedule:
  googleCalendar:
    calendarId: ""
"#;
        assert!(read_config_from_str(yaml).is_err());
    }
}
