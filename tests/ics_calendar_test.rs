//! ICS holiday feeds served over HTTP

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use worktime_scaler::config::read_config_from_str;
use worktime_scaler::controller::{build_scheduler, BuildMode};
use worktime_scaler::schedule::{CalendarProvider, IcsCalendarSource, MatchPolicy, WorkTimeProvider};

const CN_HOLIDAYS: &str = include_str!("data/cn_holidays.ics");

fn shanghai() -> Tz {
    "Asia/Shanghai".parse().unwrap()
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    shanghai()
        .with_ymd_and_hms(y, m, d, h, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

async fn serve_feed() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/holidays.ics"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CN_HOLIDAYS))
        .mount(&server)
        .await;
    server
}

fn cn_policy() -> MatchPolicy {
    MatchPolicy::Patterns {
        holidays: vec![Regex::new(".*（休）").unwrap()],
        work_days: vec![Regex::new(".*（班）").unwrap()],
    }
}

async fn provider(server: &MockServer, policy: MatchPolicy) -> CalendarProvider {
    let source = IcsCalendarSource::new(
        reqwest::Client::new(),
        format!("{}/holidays.ics", server.uri()),
        shanghai(),
    );
    CalendarProvider::start(Arc::new(source), policy, shanghai(), Duration::from_secs(3600))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_chinese_holiday_calendar() {
    let server = serve_feed().await;
    let provider = provider(&server, cn_policy()).await;
    assert_eq!(provider.cached_events().await, 6);

    let cases = [
        (at(2023, 1, 22, 10), false, "spring festival"),
        (at(2023, 1, 28, 10), true, "make-up work day"),
        (at(2023, 4, 5, 12), false, "qingming without DTEND"),
        (at(2023, 4, 29, 0), false, "first day of labour day"),
        (at(2023, 5, 3, 23), false, "last day of labour day"),
        (at(2023, 5, 4, 0), true, "DTEND is exclusive"),
        (at(2023, 3, 1, 10), true, "no events"),
    ];
    for (now, expected, case) in cases {
        assert_eq!(provider.is_work_time(now).await.unwrap(), expected, "{case}");
    }
}

#[tokio::test]
async fn test_events_without_matching_patterns_are_ignored() {
    let server = serve_feed().await;
    let provider = provider(
        &server,
        MatchPolicy::Patterns {
            holidays: vec![],
            work_days: vec![],
        },
    )
    .await;

    assert!(provider.is_work_time(at(2023, 1, 22, 10)).await.unwrap());
}

#[tokio::test]
async fn test_unreachable_feed_fails_construction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = IcsCalendarSource::new(
        reqwest::Client::new(),
        format!("{}/holidays.ics", server.uri()),
        shanghai(),
    );
    let result =
        CalendarProvider::start(Arc::new(source), cn_policy(), shanghai(), Duration::from_secs(3600)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_holiday_feed_combined_with_office_hours() {
    let server = serve_feed().await;
    let config = read_config_from_str(&format!(
        r#"
schedule:
  startTime: "09:00"
  endTime: "18:00"
  timeZone: Asia/Shanghai
  icsCalendar:
    url: {}/holidays.ics
    holidayPatterns: [".*（休）"]
    workDayPatterns: [".*（班）"]
nodeSpecs: []
"#,
        server.uri()
    ))
    .unwrap();

    let scheduler = build_scheduler(&config.schedule, &reqwest::Client::new(), BuildMode::Strict)
        .await
        .unwrap();
    assert_eq!(scheduler.len(), 2);

    // Wednesday, Qingming holiday
    assert!(!scheduler.is_work_time(at(2023, 4, 5, 12)).await.unwrap());
    // Thursday, ordinary work day
    assert!(scheduler.is_work_time(at(2023, 4, 6, 10)).await.unwrap());
    // Thursday evening
    assert!(!scheduler.is_work_time(at(2023, 4, 6, 20)).await.unwrap());
}
