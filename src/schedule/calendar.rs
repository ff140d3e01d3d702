//! Remote calendar engine shared by the Google and ICS providers
//!
//! A [`CalendarSource`] knows how to fetch events; [`CalendarProvider`] owns
//! the day-bucketed cache, the background refresh task and the lookup.
//! Refreshes build a complete new cache and swap it in under the write lock,
//! so lookups never see a half-built index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::WorkTimeProvider;
use crate::controller::metrics;
use crate::error::Result;

/// Longest span we are willing to expand into day buckets
const MAX_EVENT_DAYS: usize = 3660;

/// A calendar entry with an exclusive end
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalendarEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub label: String,
}

impl CalendarEvent {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    /// `start <= t < end`
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Day key used by the cache, `YYYY-MM-DD` in the calendar's zone
pub fn day_key(t: DateTime<Utc>, zone: Tz) -> String {
    t.with_timezone(&zone).format("%Y-%m-%d").to_string()
}

fn midnight(zone: Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    let local = zone
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| zone.from_utc_datetime(&naive));
    Some(local.with_timezone(&Utc))
}

/// Events indexed by every calendar day they touch
#[derive(Debug, Default)]
pub struct EventCache {
    days: HashMap<String, Vec<CalendarEvent>>,
    event_count: usize,
    last_sync: Option<DateTime<Utc>>,
}

impl EventCache {
    /// Bucket `events` by day in `zone`
    pub fn build(events: Vec<CalendarEvent>, zone: Tz) -> Self {
        let mut days: HashMap<String, Vec<CalendarEvent>> = HashMap::new();
        let mut event_count = 0;

        for event in events {
            if event.end <= event.start {
                warn!(
                    event = %event.label,
                    start = %event.start,
                    end = %event.end,
                    "Skipping calendar event that ends before it starts"
                );
                continue;
            }
            event_count += 1;

            let mut day = event.start.with_timezone(&zone).date_naive();
            for _ in 0..MAX_EVENT_DAYS {
                days.entry(day.format("%Y-%m-%d").to_string())
                    .or_default()
                    .push(event.clone());

                let Some(next) = day.succ_opt() else { break };
                match midnight(zone, next) {
                    Some(next_start) if next_start < event.end => day = next,
                    _ => break,
                }
            }
        }

        Self {
            days,
            event_count,
            last_sync: Some(Utc::now()),
        }
    }

    pub fn events_on(&self, key: &str) -> Option<&[CalendarEvent]> {
        self.days.get(key).map(Vec::as_slice)
    }

    /// Number of distinct events in the cache
    pub fn len(&self) -> usize {
        self.event_count
    }

    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }
}

/// How a matching event translates into a verdict
#[derive(Debug)]
pub enum MatchPolicy {
    /// Every fetched event marks off-time (the query selected them)
    AnyEventIsOffTime,
    /// Holiday labels mean off-time, work-day labels mean work time,
    /// anything else is ignored
    Patterns {
        holidays: Vec<Regex>,
        work_days: Vec<Regex>,
    },
}

impl MatchPolicy {
    pub fn is_work_time(&self, events: &[CalendarEvent], now: DateTime<Utc>) -> bool {
        for event in events.iter().filter(|e| e.contains(now)) {
            match self {
                MatchPolicy::AnyEventIsOffTime => return false,
                MatchPolicy::Patterns {
                    holidays,
                    work_days,
                } => {
                    if holidays.iter().any(|p| p.is_match(&event.label)) {
                        return false;
                    }
                    if work_days.iter().any(|p| p.is_match(&event.label)) {
                        return true;
                    }
                }
            }
        }
        true
    }
}

/// What to do with the cache when a refresh fails
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshFailure {
    KeepCache,
    ClearCache,
}

/// Fetch transport for a remote calendar
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<CalendarEvent>>;

    /// Short name used in logs and metric labels
    fn name(&self) -> &'static str;

    fn on_failure(&self) -> RefreshFailure;

    fn describe(&self) -> String;
}

async fn sync_once(
    source: &dyn CalendarSource,
    cache: &RwLock<EventCache>,
    zone: Tz,
) -> Result<usize> {
    match source.fetch().await {
        Ok(events) => {
            let fresh = EventCache::build(events, zone);
            let count = fresh.len();
            *cache.write().await = fresh;
            metrics::record_calendar_sync(source.name(), "ok");
            info!(provider = source.name(), events_count = count, "Calendar events synced successfully");
            Ok(count)
        }
        Err(e) => {
            metrics::record_calendar_sync(source.name(), "error");
            if source.on_failure() == RefreshFailure::ClearCache {
                *cache.write().await = EventCache::default();
            }
            Err(e)
        }
    }
}

async fn refresh_loop(
    source: Arc<dyn CalendarSource>,
    cache: Arc<RwLock<EventCache>>,
    zone: Tz,
    sync_interval: Duration,
) {
    let mut interval = tokio::time::interval(sync_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately; the initial sync already ran
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(e) = sync_once(source.as_ref(), &cache, zone).await {
            error!(provider = source.name(), error = %e, "Failed to sync calendar events");
        }
    }
}

/// Work-time provider backed by a periodically refreshed remote calendar
pub struct CalendarProvider {
    source: Arc<dyn CalendarSource>,
    cache: Arc<RwLock<EventCache>>,
    policy: MatchPolicy,
    zone: Tz,
    sync_interval: Duration,
    refresh: JoinHandle<()>,
}

impl CalendarProvider {
    /// Run the initial sync, then start the background refresh task.
    ///
    /// The refresh task is aborted when the provider is dropped.
    pub async fn start(
        source: Arc<dyn CalendarSource>,
        policy: MatchPolicy,
        zone: Tz,
        sync_interval: Duration,
    ) -> Result<Self> {
        let cache = Arc::new(RwLock::new(EventCache::default()));
        sync_once(source.as_ref(), &cache, zone).await?;

        let refresh = tokio::spawn(refresh_loop(
            source.clone(),
            cache.clone(),
            zone,
            sync_interval,
        ));

        Ok(Self {
            source,
            cache,
            policy,
            zone,
            sync_interval,
            refresh,
        })
    }

    /// Refresh now instead of waiting for the next interval
    pub async fn sync(&self) -> Result<usize> {
        sync_once(self.source.as_ref(), &self.cache, self.zone).await
    }

    pub async fn cached_events(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl Drop for CalendarProvider {
    fn drop(&mut self) {
        self.refresh.abort();
    }
}

#[async_trait]
impl WorkTimeProvider for CalendarProvider {
    async fn is_work_time(&self, now: DateTime<Utc>) -> Result<bool> {
        let cache = self.cache.read().await;
        let key = day_key(now, self.zone);

        let Some(events) = cache.events_on(&key) else {
            debug!(provider = self.source.name(), day = %key, "No cached events, assuming work time");
            return Ok(true);
        };

        Ok(self.policy.is_work_time(events, now))
    }

    fn describe(&self) -> String {
        let cached = self
            .cache
            .try_read()
            .map(|c| c.len().to_string())
            .unwrap_or_else(|_| "?".to_string());
        format!(
            "{}, syncInterval: {:?}, timeZone: {}, cachedEvents: {}",
            self.source.describe(),
            self.sync_interval,
            self.zone,
            cached
        )
    }
}
