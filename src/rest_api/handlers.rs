//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, instrument};

use crate::controller::{metrics, ScalingController};

use super::dto::{ErrorResponse, HealthResponse, PoolSummary, StatusResponse};

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus text exposition of the controller registry
pub async fn metrics_handler() -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    metrics::render().map_err(|e| {
        error!("Failed to encode metrics: {:?}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("encode_failed", &e.to_string())),
        )
    })
}

/// Managed pools and the outcome of the last reconciliation
#[instrument(skip(controller))]
pub async fn status(State(controller): State<Arc<ScalingController>>) -> Json<StatusResponse> {
    let snapshot = controller.snapshot().await;
    let status = controller.status().await;

    let pools = snapshot
        .config
        .node_specs
        .iter()
        .map(|spec| PoolSummary {
            node_pool_name: spec.node_pool_name.clone(),
            cloud_provider: spec.cloud_provider.clone(),
            off_time_count: spec.off_time_count,
            managed: snapshot.providers.contains_key(&spec.node_pool_name),
        })
        .collect();

    Json(StatusResponse {
        scheduler: snapshot.scheduler.describe(),
        work_time: status.work_time,
        last_reconcile: status.last_reconcile,
        last_error: status.last_error,
        pools,
    })
}
