//! Response bodies of the REST API

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// A configured node pool and whether a provider is handling it
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub node_pool_name: String,
    pub cloud_provider: String,
    pub off_time_count: i32,
    pub managed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub scheduler: String,
    pub work_time: Option<bool>,
    pub last_reconcile: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pools: Vec<PoolSummary>,
}
