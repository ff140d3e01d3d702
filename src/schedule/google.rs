//! Google Calendar event source
//!
//! Authenticates with a service-account key (JWT-bearer grant) and lists the
//! events matching the configured off-time query over the next `cacheDays`
//! days. Every returned event marks off-time.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::calendar::{CalendarEvent, CalendarSource, RefreshFailure};
use crate::config::GoogleCalendarConfig;
use crate::error::{Error, Result};
use crate::gcp::{TokenCache, TokenResponse};

pub const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

const CALENDAR_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// The parts of a service-account JSON key we need
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(Error::ConfigError(format!(
                "credentials path must be absolute: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::AuthError(format!("unable to read credentials file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| Error::AuthError(format!("invalid service account key: {e}")))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
    time_zone: Option<String>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct EventItem {
    summary: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: Option<String>,
    date: Option<String>,
    time_zone: Option<String>,
}

impl EventTime {
    /// Resolve to an instant; all-day dates are midnight in the event's zone
    fn resolve(&self, fallback: Tz) -> Result<DateTime<Utc>> {
        if let Some(dt) = &self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::CalendarError(format!("invalid dateTime {dt:?}: {e}")));
        }
        if let Some(date) = &self.date {
            let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| Error::CalendarError(format!("invalid date {date:?}: {e}")))?;
            let zone = self
                .time_zone
                .as_deref()
                .and_then(|z| z.parse::<Tz>().ok())
                .unwrap_or(fallback);
            let midnight = day.and_hms_opt(0, 0, 0).unwrap_or_default();
            return zone
                .from_local_datetime(&midnight)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .ok_or_else(|| Error::CalendarError(format!("date {date} has no midnight in {zone}")));
        }
        Err(Error::CalendarError("event time has neither date nor dateTime".to_string()))
    }
}

/// Lists off-time events from one Google calendar
pub struct GoogleCalendarSource {
    http: reqwest::Client,
    api_base: String,
    calendar_id: String,
    query: String,
    cache_days: u32,
    zone: Tz,
    key: ServiceAccountKey,
    token: TokenCache,
}

impl GoogleCalendarSource {
    /// Build from configuration, loading the service-account key from disk
    pub fn from_config(cfg: &GoogleCalendarConfig, zone: Tz, http: reqwest::Client) -> Result<Self> {
        let key = ServiceAccountKey::from_file(&cfg.credentials_path)?;
        Ok(Self::new(http, key, &cfg.calendar_id, &cfg.off_time_events, cfg.cache_days, zone))
    }

    pub fn new(
        http: reqwest::Client,
        key: ServiceAccountKey,
        calendar_id: &str,
        query: &str,
        cache_days: u32,
        zone: Tz,
    ) -> Self {
        Self {
            http,
            api_base: GOOGLE_CALENDAR_API.to_string(),
            calendar_id: calendar_id.to_string(),
            query: query.to_string(),
            cache_days,
            zone,
            key,
            token: TokenCache::new(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn exchange_assertion(&self) -> Result<TokenResponse> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: CALENDAR_READONLY_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| Error::AuthError(format!("invalid service account private key: {e}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| Error::AuthError(format!("failed to sign token request: {e}")))?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthError(format!("token exchange failed ({status}): {body}")));
        }
        Ok(response.json().await?)
    }

    fn events_url(&self) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| Error::ConfigError(format!("invalid calendar API base {}: {e}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|_| Error::ConfigError(format!("invalid calendar API base {}", self.api_base)))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }

    fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = Utc::now().with_timezone(&self.zone).date_naive();
        let start = today
            .and_hms_opt(0, 0, 0)
            .and_then(|t| self.zone.from_local_datetime(&t).earliest())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        (start, start + Duration::days(i64::from(self.cache_days)))
    }

    fn convert(&self, item: EventItem, list_zone: Tz) -> Option<CalendarEvent> {
        let label = item.summary.unwrap_or_default();
        let start = match item.start.as_ref().map(|s| s.resolve(list_zone)) {
            Some(Ok(t)) => t,
            Some(Err(e)) => {
                warn!(event = %label, error = %e, "Skipping event with unparseable start");
                return None;
            }
            None => {
                warn!(event = %label, "Skipping event without start");
                return None;
            }
        };
        let end = match item.end.as_ref().map(|e| e.resolve(list_zone)) {
            Some(Ok(t)) => t,
            Some(Err(e)) => {
                warn!(event = %label, error = %e, "Skipping event with unparseable end");
                return None;
            }
            None => start + Duration::days(1),
        };
        Some(CalendarEvent::new(start, end, label))
    }
}

#[async_trait]
impl CalendarSource for GoogleCalendarSource {
    #[instrument(skip(self), fields(calendar_id = %self.calendar_id))]
    async fn fetch(&self) -> Result<Vec<CalendarEvent>> {
        if self.query.trim().is_empty() {
            debug!("No off-time query configured, nothing to fetch");
            return Ok(Vec::new());
        }

        let token = self.token.get_or_refresh(|| self.exchange_assertion()).await?;
        let url = self.events_url()?;
        let (time_min, time_max) = self.window();
        let time_min = time_min.to_rfc3339();
        let time_max = time_max.to_rfc3339();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(url.clone()).bearer_auth(&token).query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("q", self.query.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
            ]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(Error::CalendarError(format!(
                    "unable to retrieve events ({status}): {body}"
                )));
            }

            let list: EventList = response.json().await?;
            let list_zone = list
                .time_zone
                .as_deref()
                .and_then(|z| z.parse::<Tz>().ok())
                .unwrap_or(self.zone);
            events.extend(list.items.into_iter().filter_map(|item| self.convert(item, list_zone)));

            match list.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(events)
    }

    fn name(&self) -> &'static str {
        "google"
    }

    fn on_failure(&self) -> RefreshFailure {
        RefreshFailure::KeepCache
    }

    fn describe(&self) -> String {
        format!(
            "GoogleCalendarProvider{{calendarId: {}, offTimeEvents: {:?}, cacheDays: {}}}",
            self.calendar_id, self.query, self.cache_days
        )
    }
}
