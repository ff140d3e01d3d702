//! Fixed weekly working window

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::WorkTimeProvider;
use crate::config::{parse_clock, parse_time_zone, WorkDays, WorkSchedule};
use crate::error::Result;

/// Work time is a daily clock window on selected weekdays
#[derive(Clone, Debug)]
pub struct StaticProvider {
    start_time: String,
    end_time: String,
    time_zone: String,
    work_days: WorkDays,
}

impl StaticProvider {
    pub fn new(
        start_time: impl Into<String>,
        end_time: impl Into<String>,
        time_zone: impl Into<String>,
        work_days: WorkDays,
    ) -> Self {
        Self {
            start_time: start_time.into(),
            end_time: end_time.into(),
            time_zone: time_zone.into(),
            work_days,
        }
    }

    pub fn from_schedule(schedule: &WorkSchedule) -> Self {
        Self::new(
            &schedule.start_time,
            &schedule.end_time,
            &schedule.time_zone,
            schedule.work_days.clone(),
        )
    }
}

/// Pin a wall-clock time to a date in `tz`. Times inside a DST gap move
/// forward by an hour; ambiguous times take the earlier instant.
fn anchor(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

#[async_trait]
impl WorkTimeProvider for StaticProvider {
    async fn is_work_time(&self, now: DateTime<Utc>) -> Result<bool> {
        let tz = parse_time_zone(&self.time_zone)?;
        let local = now.with_timezone(&tz);

        if !self.work_days.contains(local.weekday()) {
            return Ok(false);
        }

        let start = anchor(&tz, local.date_naive(), parse_clock(&self.start_time)?);
        let end = anchor(&tz, local.date_naive(), parse_clock(&self.end_time)?);

        Ok(local > start && local < end)
    }

    fn describe(&self) -> String {
        let days: Vec<String> = self
            .work_days
            .enabled_days()
            .iter()
            .map(|d| d.to_string())
            .collect();
        format!(
            "StaticProvider{{startTime: {}, endTime: {}, timeZone: {}, workDays: [{}]}}",
            self.start_time,
            self.end_time,
            self.time_zone,
            days.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn shanghai(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        tz.with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn office_hours() -> StaticProvider {
        StaticProvider::new("09:00", "17:00", "Asia/Shanghai", WorkDays::default())
    }

    #[tokio::test]
    async fn test_inside_window_on_work_day() {
        // 2024-01-10 is a Wednesday
        let provider = office_hours();
        assert!(provider.is_work_time(shanghai(2024, 1, 10, 10, 0)).await.unwrap());
        assert!(provider.is_work_time(shanghai(2024, 1, 10, 16, 59)).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_bounds_are_exclusive() {
        let provider = office_hours();
        assert!(!provider.is_work_time(shanghai(2024, 1, 10, 9, 0)).await.unwrap());
        assert!(!provider.is_work_time(shanghai(2024, 1, 10, 17, 0)).await.unwrap());
        assert!(!provider.is_work_time(shanghai(2024, 1, 10, 20, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_weekend_is_never_work_time() {
        // 2024-01-13 is a Saturday
        let provider = office_hours();
        assert!(!provider.is_work_time(shanghai(2024, 1, 13, 12, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_weekday_is_evaluated_in_configured_zone() {
        // Friday 23:30 UTC is already Saturday in Shanghai
        let provider = StaticProvider::new(
            "00:00",
            "23:59",
            "Asia/Shanghai",
            WorkDays::default(),
        );
        let friday_night_utc = Utc.with_ymd_and_hms(2024, 1, 12, 23, 30, 0).unwrap();
        assert!(!provider.is_work_time(friday_night_utc).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_time_zone() {
        let provider = StaticProvider::new("09:00", "17:00", "Nowhere/Land", WorkDays::default());
        let err = provider.is_work_time(Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTimeZone(_)));
    }

    #[tokio::test]
    async fn test_invalid_time_format() {
        let provider = StaticProvider::new("9am", "17:00", "UTC", WorkDays::default());
        // 2024-01-10 is a Wednesday, so the clock values get parsed
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let err = provider.is_work_time(now).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTimeFormat(_)));
    }

    #[test]
    fn test_describe_lists_work_days() {
        let text = office_hours().describe();
        assert!(text.contains("Asia/Shanghai"));
        assert!(text.contains("Mon"));
        assert!(!text.contains("Sat"));
    }
}
