//! ICS (iCalendar) feed source
//!
//! Downloads a public feed over HTTP and turns `VEVENT`s into
//! [`CalendarEvent`]s. Labels are classified later by the provider's
//! holiday and work-day patterns.

use std::io::BufReader;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;
use ical::IcalParser;
use tracing::{debug, instrument, warn};

use super::calendar::{CalendarEvent, CalendarSource, RefreshFailure};
use crate::error::{Error, Result};

fn param<'a>(prop: &'a Property, name: &str) -> Option<&'a str> {
    prop.params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

fn property<'a>(event: &'a IcalEvent, name: &str) -> Option<&'a Property> {
    event
        .properties
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

fn local_to_utc(zone: Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| Error::CalendarError(format!("{naive} does not exist in {zone}")))
}

/// Parse a `DTSTART`/`DTEND` value.
///
/// Dates are midnight in the property's `TZID` or the calendar zone;
/// `Z`-suffixed values are UTC; other date-times are local to `TZID` or
/// the calendar zone.
fn parse_ical_time(prop: &Property, calendar_zone: Tz) -> Result<DateTime<Utc>> {
    let value = prop
        .value
        .as_deref()
        .map(str::trim)
        .ok_or_else(|| Error::CalendarError(format!("{} has no value", prop.name)))?;

    let zone = match param(prop, "TZID") {
        Some(tzid) => tzid
            .parse::<Tz>()
            .map_err(|_| Error::CalendarError(format!("unknown TZID {tzid:?}")))?,
        None => calendar_zone,
    };

    let is_date = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE")) || value.len() == 8;
    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|e| Error::CalendarError(format!("invalid date {value:?}: {e}")))?;
        return local_to_utc(zone, date.and_hms_opt(0, 0, 0).unwrap_or_default());
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .map_err(|e| Error::CalendarError(format!("invalid date-time {value:?}: {e}")))?;
        return Ok(Utc.from_utc_datetime(&naive));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|e| Error::CalendarError(format!("invalid date-time {value:?}: {e}")))?;
    local_to_utc(zone, naive)
}

/// Parse an ICS document into events.
///
/// `X-WR-TIMEZONE` overrides `default_zone` for the calendar. Events
/// without a summary or start are skipped; a missing end means the event
/// lasts one day.
pub fn parse_ics(text: &str, default_zone: Tz) -> Result<Vec<CalendarEvent>> {
    let mut events = Vec::new();

    for calendar in IcalParser::new(BufReader::new(text.as_bytes())) {
        let calendar = calendar.map_err(|e| Error::CalendarError(format!("failed to parse ICS data: {e}")))?;

        let zone = calendar
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case("X-WR-TIMEZONE"))
            .and_then(|p| p.value.as_deref())
            .and_then(|v| v.trim().parse::<Tz>().ok())
            .unwrap_or(default_zone);

        for event in &calendar.events {
            let Some(summary) = property(event, "SUMMARY")
                .and_then(|p| p.value.as_deref())
                .filter(|s| !s.trim().is_empty())
            else {
                continue;
            };

            let Some(dtstart) = property(event, "DTSTART") else {
                warn!(event = summary, "Skipping ICS event without DTSTART");
                continue;
            };
            let start = match parse_ical_time(dtstart, zone) {
                Ok(t) => t,
                Err(e) => {
                    warn!(event = summary, error = %e, "Skipping ICS event with invalid DTSTART");
                    continue;
                }
            };

            let end = match property(event, "DTEND").map(|p| parse_ical_time(p, zone)) {
                Some(Ok(t)) => t,
                Some(Err(e)) => {
                    warn!(event = summary, error = %e, "Skipping ICS event with invalid DTEND");
                    continue;
                }
                None => start + Duration::days(1),
            };

            events.push(CalendarEvent::new(start, end, summary.trim()));
        }
    }

    Ok(events)
}

/// Fetches an ICS feed over HTTP
pub struct IcsCalendarSource {
    http: reqwest::Client,
    url: String,
    zone: Tz,
}

impl IcsCalendarSource {
    pub fn new(http: reqwest::Client, url: impl Into<String>, zone: Tz) -> Self {
        Self {
            http,
            url: url.into(),
            zone,
        }
    }
}

#[async_trait]
impl CalendarSource for IcsCalendarSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<CalendarEvent>> {
        let response = self.http.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::CalendarError(format!(
                "unexpected status fetching ICS feed: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let events = parse_ics(&body, self.zone)?;
        debug!(count = events.len(), "Parsed ICS feed");
        Ok(events)
    }

    fn name(&self) -> &'static str {
        "ics"
    }

    fn on_failure(&self) -> RefreshFailure {
        RefreshFailure::ClearCache
    }

    fn describe(&self) -> String {
        format!("ICSCalendarProvider{{url: {}}}", self.url)
    }
}
