//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ScalingController;
use crate::{Error, Result};

use super::handlers;

pub fn router(controller: Arc<ScalingController>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/v1/status", get(handlers::status))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

/// Run the REST API server
pub async fn run_server(controller: Arc<ScalingController>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("REST API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, router(controller))
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
