//! REST API module
//!
//! Exposes liveness, Prometheus metrics and the controller's current status.

mod dto;
mod handlers;
mod server;

pub use dto::{ErrorResponse, HealthResponse, PoolSummary, StatusResponse};
pub use server::{router, run_server};
