//! Work-time providers
//!
//! Every provider answers one question: should the cluster run at full
//! capacity at a given instant. The controller combines the configured
//! providers with [`CompositeProvider`].

mod calendar;
mod composite;
mod google;
mod ics;
mod static_window;

pub use calendar::{CalendarEvent, CalendarProvider, CalendarSource, EventCache, MatchPolicy, RefreshFailure};
pub use composite::CompositeProvider;
pub use google::{GoogleCalendarSource, GOOGLE_CALENDAR_API};
pub use ics::{parse_ics, IcsCalendarSource};
pub use static_window::StaticProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Decides whether an instant falls inside working time
#[async_trait]
pub trait WorkTimeProvider: Send + Sync {
    async fn is_work_time(&self, now: DateTime<Utc>) -> Result<bool>;

    /// One-line summary for logs
    fn describe(&self) -> String;
}
