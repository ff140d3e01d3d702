//! worktime-scaler: Kubernetes controller that shrinks node pools outside
//! working hours and restores them when work resumes.
//!
//! Work time is decided by a static weekly window, optionally combined with
//! a Google Calendar and an ICS holiday feed. Node pools on GKE and EKS are
//! scaled down to a configured size and their previous configuration is
//! saved in a ConfigMap so it can be put back later.

pub mod config;
pub mod controller;
pub mod error;
pub mod gcp;
pub mod kubernetes;
pub mod providers;
pub mod schedule;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
