//! Prometheus metrics for the worktime scaler
//!
//! # Exported metrics
//! - `worktime_scaler_reconcile_duration_seconds` (histogram): duration of a reconcile tick.
//! - `worktime_scaler_work_time` (gauge): 1 when the last tick decided work time, 0 otherwise.
//! - `worktime_scaler_pool_operations_total` (counter): scale/restore attempts labeled by
//!   node_pool, operation and outcome.
//! - `worktime_scaler_calendar_syncs_total` (counter): calendar refreshes labeled by provider
//!   and outcome.
//! - `worktime_scaler_config_reloads_total` (counter): live configuration updates labeled by
//!   outcome.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for per-pool operations
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PoolOperationLabels {
    pub node_pool: String,
    /// "scale_down" or "restore"
    pub operation: String,
    /// "ok", "busy", "no_saved_state", "error" or "skipped"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CalendarSyncLabels {
    pub provider: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    // 10ms .. ~5.5min across 16 buckets.
    Histogram::new(exponential_buckets(0.01, 2.0, 16))
});

pub static WORK_TIME: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

pub static POOL_OPERATIONS_TOTAL: Lazy<Family<PoolOperationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CALENDAR_SYNCS_TOTAL: Lazy<Family<CalendarSyncLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CONFIG_RELOADS_TOTAL: Lazy<Family<OutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "worktime_scaler_reconcile_duration_seconds",
        "Duration of reconcile ticks in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "worktime_scaler_work_time",
        "Whether the last reconcile tick evaluated to work time",
        WORK_TIME.clone(),
    );
    registry.register(
        "worktime_scaler_pool_operations",
        "Node pool scale-down and restore attempts",
        POOL_OPERATIONS_TOTAL.clone(),
    );
    registry.register(
        "worktime_scaler_calendar_syncs",
        "Remote calendar refreshes",
        CALENDAR_SYNCS_TOTAL.clone(),
    );
    registry.register(
        "worktime_scaler_config_reloads",
        "Live configuration updates",
        CONFIG_RELOADS_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(seconds: f64) {
    RECONCILE_DURATION_SECONDS.observe(seconds);
}

pub fn set_work_time(work_time: bool) {
    WORK_TIME.set(i64::from(work_time));
}

/// Count one scale-down or restore attempt.
pub fn inc_pool_operation(node_pool: &str, operation: &str, outcome: &str) {
    let labels = PoolOperationLabels {
        node_pool: node_pool.to_string(),
        operation: operation.to_string(),
        outcome: outcome.to_string(),
    };
    POOL_OPERATIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn record_calendar_sync(provider: &str, outcome: &str) {
    let labels = CalendarSyncLabels {
        provider: provider.to_string(),
        outcome: outcome.to_string(),
    };
    CALENDAR_SYNCS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_config_reload(outcome: &str) {
    let labels = OutcomeLabels {
        outcome: outcome.to_string(),
    };
    CONFIG_RELOADS_TOTAL.get_or_create(&labels).inc();
}

/// Render the registry in the Prometheus text format
pub fn render() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
