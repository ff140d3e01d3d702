//! Loading configuration files from disk

use std::io::Write;

use tempfile::NamedTempFile;
use worktime_scaler::config::{read_config, DEFAULT_SYNC_INTERVAL};
use worktime_scaler::Error;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_config_file() {
    let file = write_config(
        r#"
schedule:
  startTime: "08:30"
  endTime: "18:00"
  timeZone: Asia/Shanghai
  workDays:
    friday: false
    saturday: true
  icsCalendar:
    url: https://example.com/holidays.ics
    holidayPatterns: [".*（休）"]
    workDayPatterns: [".*（班）"]
nodeSpecs:
  - nodePoolName: default-pool
    cloudProvider: gke
    offTimeCount: 1
  - nodePoolName: batch
    cloudProvider: aws
"#,
    );

    let cfg = read_config(file.path()).unwrap();
    assert_eq!(cfg.schedule.start_time, "08:30");
    assert_eq!(cfg.schedule.time_zone, "Asia/Shanghai");
    assert!(cfg.schedule.work_days.monday);
    assert!(!cfg.schedule.work_days.friday);
    assert!(cfg.schedule.work_days.saturday);
    let ics = cfg.schedule.ics_calendar.as_ref().unwrap();
    assert_eq!(ics.sync_interval, DEFAULT_SYNC_INTERVAL);
    assert_eq!(ics.holiday_patterns, vec![".*（休）"]);
    assert_eq!(cfg.node_specs.len(), 2);
    assert_eq!(cfg.node_specs[1].off_time_count, 0);
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_config(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, Error::ConfigError(_)));
}

#[test]
fn test_invalid_files_are_rejected() {
    let cases = [
        (
            "schedule:\n  startTime: \"9am\"\nnodeSpecs: []\n",
            "InvalidTimeFormat",
        ),
        (
            "schedule:\n  timeZone: Mars/Olympus\nnodeSpecs: []\n",
            "InvalidTimeZone",
        ),
        (
            "nodeSpecs:\n  - nodePoolName: a\n    cloudProvider: gke\n    offTimeCount: -1\n",
            "ConfigError",
        ),
        (
            "nodeSpecs:\n  - nodePoolName: a\n    cloudProvider: gke\n  - nodePoolName: a\n    cloudProvider: aws\n",
            "ConfigError",
        ),
        (
            "schedule:\n  icsCalendar:\n    url: https://example.com/a.ics\n    holidayPatterns: [\"(\"]\nnodeSpecs: []\n",
            "InvalidPattern",
        ),
        ("schedule: [not, a, map]\n", "YamlError"),
    ];

    for (contents, expected) in cases {
        let file = write_config(contents);
        let err = read_config(file.path()).unwrap_err();
        let variant = match err {
            Error::InvalidTimeFormat(_) => "InvalidTimeFormat",
            Error::InvalidTimeZone(_) => "InvalidTimeZone",
            Error::ConfigError(_) => "ConfigError",
            Error::InvalidPattern { .. } => "InvalidPattern",
            Error::YamlError(_) => "YamlError",
            other => panic!("unexpected error for {contents:?}: {other}"),
        };
        assert_eq!(variant, expected, "{contents}");
    }
}
