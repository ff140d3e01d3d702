//! Controller module for node pool scaling
//!
//! This module contains the reconciliation loop that scales pools down in
//! off-time and restores them in work time, plus its Prometheus metrics.

pub mod metrics;
mod scaling;

pub use scaling::{
    build_providers, build_scheduler, BuildMode, ReconcileStatus, ScalingController, Snapshot,
};
