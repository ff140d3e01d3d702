//! Scaling controller
//!
//! Holds the current configuration together with the scheduler and provider
//! map built from it, and reconciles every configured pool against the
//! work-time verdict. Configuration updates build a complete new snapshot
//! and swap it in, so a reconcile tick always sees one consistent
//! configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::metrics;
use crate::config::{compile_patterns, parse_time_zone, Config, WorkSchedule};
use crate::error::{Error, Result};
use crate::providers::{CloudProvider, Outcome, ProviderFactory};
use crate::schedule::{
    CalendarProvider, CompositeProvider, GoogleCalendarSource, IcsCalendarSource, MatchPolicy,
    StaticProvider, WorkTimeProvider,
};

/// How construction failures are handled while building a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// Any failure aborts the build (startup)
    Strict,
    /// Failures are logged and the failing component is left out (live updates)
    Tolerant,
}

/// Everything one reconcile tick needs, built from a single configuration
pub struct Snapshot {
    pub config: Config,
    pub scheduler: Arc<dyn WorkTimeProvider>,
    /// Provider per pool name
    pub providers: HashMap<String, Arc<dyn CloudProvider>>,
}

/// Outcome of the most recent reconcile tick
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStatus {
    pub last_reconcile: Option<DateTime<Utc>>,
    pub work_time: Option<bool>,
    pub last_error: Option<String>,
}

fn tolerate<T>(mode: BuildMode, what: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if mode == BuildMode::Tolerant => {
            error!(error = %e, "Failed to create {}", what);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Build the composite work-time provider for a schedule
pub async fn build_scheduler(
    schedule: &WorkSchedule,
    http: &reqwest::Client,
    mode: BuildMode,
) -> Result<CompositeProvider> {
    let mut composite = CompositeProvider::default();

    if schedule.has_static_window() {
        composite.push(Box::new(StaticProvider::from_schedule(schedule)));
    }

    if let Some(google) = &schedule.google_calendar {
        info!("Using Google Calendar provider");
        let provider = async {
            let zone = parse_time_zone(&schedule.time_zone)?;
            let source = GoogleCalendarSource::from_config(google, zone, http.clone())?;
            CalendarProvider::start(
                Arc::new(source),
                MatchPolicy::AnyEventIsOffTime,
                zone,
                google.sync_interval()?,
            )
            .await
        }
        .await;
        if let Some(provider) = tolerate(mode, "Google Calendar provider", provider)? {
            composite.push(Box::new(provider));
        }
    }

    if let Some(ics) = &schedule.ics_calendar {
        info!("Using ICS calendar provider");
        let provider = async {
            let zone = parse_time_zone(ics.time_zone.as_deref().unwrap_or(&schedule.time_zone))?;
            let policy = MatchPolicy::Patterns {
                holidays: compile_patterns("holiday", &ics.holiday_patterns)?,
                work_days: compile_patterns("work day", &ics.work_day_patterns)?,
            };
            let source = IcsCalendarSource::new(http.clone(), &ics.url, zone);
            CalendarProvider::start(Arc::new(source), policy, zone, ics.sync_interval()?).await
        }
        .await;
        if let Some(provider) = tolerate(mode, "ICS calendar provider", provider)? {
            composite.push(Box::new(provider));
        }
    }

    if composite.is_empty() {
        return Err(Error::ConfigError("no schedule providers configured".to_string()));
    }
    Ok(composite)
}

/// Create one provider per kind and map every pool to its provider
pub async fn build_providers(
    config: &Config,
    factory: &dyn ProviderFactory,
    mode: BuildMode,
) -> Result<HashMap<String, Arc<dyn CloudProvider>>> {
    let mut by_kind: HashMap<&str, Option<Arc<dyn CloudProvider>>> = HashMap::new();
    let mut providers = HashMap::new();

    for spec in &config.node_specs {
        let kind = spec.cloud_provider.as_str();
        let provider = match by_kind.get(kind) {
            Some(cached) => cached.clone(),
            None => {
                let created = match factory.create(kind).await {
                    Ok(provider) => Some(provider),
                    Err(e) if mode == BuildMode::Tolerant => {
                        error!(cloud_provider = kind, error = %e, "Failed to create cloud provider");
                        None
                    }
                    Err(e) => {
                        return Err(Error::ConfigError(format!(
                            "failed to create provider for node pool {}: {e}",
                            spec.node_pool_name
                        )))
                    }
                };
                by_kind.insert(kind, created.clone());
                created
            }
        };

        match provider {
            Some(provider) => {
                providers.insert(spec.node_pool_name.clone(), provider);
            }
            None => error!(
                node_pool = %spec.node_pool_name,
                cloud_provider = kind,
                "Dropping node pool without a usable provider"
            ),
        }
    }

    Ok(providers)
}

pub struct ScalingController {
    snapshot: RwLock<Arc<Snapshot>>,
    factory: Arc<dyn ProviderFactory>,
    http: reqwest::Client,
    status: RwLock<ReconcileStatus>,
    tick_guard: Mutex<()>,
}

impl ScalingController {
    /// Build the controller; any invalid component is fatal
    pub async fn new(
        config: Config,
        factory: Arc<dyn ProviderFactory>,
        http: reqwest::Client,
    ) -> Result<Self> {
        let snapshot = Self::build(config, factory.as_ref(), &http, BuildMode::Strict).await?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            factory,
            http,
            status: RwLock::new(ReconcileStatus::default()),
            tick_guard: Mutex::new(()),
        })
    }

    async fn build(
        config: Config,
        factory: &dyn ProviderFactory,
        http: &reqwest::Client,
        mode: BuildMode,
    ) -> Result<Snapshot> {
        let scheduler = build_scheduler(&config.schedule, http, mode).await?;
        info!(scheduler = %scheduler.describe(), "Schedule providers initialized");
        let providers = build_providers(&config, factory, mode).await?;
        Ok(Snapshot {
            config,
            scheduler: Arc::new(scheduler),
            providers,
        })
    }

    /// Adopt a new configuration.
    ///
    /// Component failures are logged and the component left out. The update
    /// is rejected, keeping the running snapshot, only when no schedule
    /// provider could be built.
    #[instrument(skip(self, config))]
    pub async fn apply_configuration(&self, config: Config) -> Result<()> {
        let snapshot = match Self::build(config, self.factory.as_ref(), &self.http, BuildMode::Tolerant).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::inc_config_reload("rejected");
                return Err(e);
            }
        };

        *self.snapshot.write().await = Arc::new(snapshot);
        metrics::inc_config_reload("applied");
        info!("Controller configuration updated");
        Ok(())
    }

    /// Current snapshot; the lock is released before returning
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().await.clone()
    }

    pub async fn status(&self) -> ReconcileStatus {
        self.status.read().await.clone()
    }

    pub async fn reconcile(&self) {
        self.reconcile_at(Utc::now()).await
    }

    /// Evaluate the schedule at `now` and scale or restore every pool.
    ///
    /// Pools are processed in configuration order; a failure on one pool is
    /// logged and does not affect the others.
    #[instrument(skip(self))]
    pub async fn reconcile_at(&self, now: DateTime<Utc>) {
        let started = Instant::now();
        let snapshot = self.snapshot().await;
        debug!("Starting reconciliation");

        let work_time = match snapshot.scheduler.is_work_time(now).await {
            Ok(work_time) => work_time,
            Err(e) => {
                error!(error = %e, "Error checking work time");
                let mut status = self.status.write().await;
                status.last_reconcile = Some(now);
                status.last_error = Some(e.to_string());
                return;
            }
        };
        metrics::set_work_time(work_time);
        debug!(work_time, "Work time check");

        let mut last_error = None;
        for spec in &snapshot.config.node_specs {
            let pool = spec.node_pool_name.as_str();
            let operation = if work_time { "restore" } else { "scale_down" };

            let Some(provider) = snapshot.providers.get(pool) else {
                warn!(node_pool = pool, "No provider found for node pool");
                metrics::inc_pool_operation(pool, operation, "skipped");
                continue;
            };

            let result = if work_time {
                provider.restore(pool).await
            } else {
                provider.scale_down(pool, spec.off_time_count).await
            };

            let outcome = match result {
                Ok(Outcome::Done) => "ok",
                Ok(Outcome::Busy) => "busy",
                Err(e) if e.is_no_saved_state() => {
                    warn!(node_pool = pool, "No saved state found for node pool");
                    "no_saved_state"
                }
                Err(e) => {
                    error!(
                        node_pool = pool,
                        operation,
                        desired_count = spec.off_time_count,
                        error = %e,
                        "Node pool operation failed"
                    );
                    last_error = Some(format!("{pool}: {e}"));
                    "error"
                }
            };
            metrics::inc_pool_operation(pool, operation, outcome);
        }

        *self.status.write().await = ReconcileStatus {
            last_reconcile: Some(now),
            work_time: Some(work_time),
            last_error,
        };
        metrics::observe_reconcile_duration_seconds(started.elapsed().as_secs_f64());
    }

    /// Run one reconcile unless the previous one is still in progress
    pub async fn tick(&self) -> bool {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            warn!("Previous reconciliation still running, skipping tick");
            return false;
        };
        self.reconcile().await;
        true
    }

    /// Reconcile on a fixed period until the task is dropped
    pub async fn run(self: Arc<Self>, period: Duration) {
        info!(period = ?period, "Starting scaling controller");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let controller = self.clone();
            tokio::spawn(async move {
                controller.tick().await;
            });
        }
    }

    /// Apply every configuration received on `updates`
    pub async fn listen(self: Arc<Self>, mut updates: mpsc::Receiver<Config>) {
        while let Some(config) = updates.recv().await {
            if let Err(e) = self.apply_configuration(config).await {
                error!(error = %e, "Rejected configuration update, keeping the running configuration");
            }
        }
    }
}
