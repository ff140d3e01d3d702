//! REST API served against a controller with an in-memory provider

#![cfg(feature = "rest-api")]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use worktime_scaler::config::read_config_from_str;
use worktime_scaler::controller::ScalingController;
use worktime_scaler::providers::{CloudProvider, Outcome, ProviderFactory};
use worktime_scaler::{Error, Result};

struct NoopProvider;

#[async_trait]
impl CloudProvider for NoopProvider {
    async fn scale_down(&self, _pool: &str, _count: i32) -> Result<Outcome> {
        Ok(Outcome::Done)
    }

    async fn restore(&self, _pool: &str) -> Result<Outcome> {
        Ok(Outcome::Done)
    }

    fn kind(&self) -> &'static str {
        "noop"
    }
}

struct NoopFactory;

#[async_trait]
impl ProviderFactory for NoopFactory {
    async fn create(&self, kind: &str) -> Result<Arc<dyn CloudProvider>> {
        match kind {
            "noop" => Ok(Arc::new(NoopProvider)),
            other => Err(Error::UnsupportedProvider {
                kind: other.to_string(),
            }),
        }
    }
}

async fn serve(controller: Arc<ScalingController>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, worktime_scaler::rest_api::router(controller))
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

async fn controller() -> Arc<ScalingController> {
    let config = read_config_from_str(
        r#"
schedule:
  startTime: "09:00"
  endTime: "17:00"
  timeZone: UTC
nodeSpecs:
  - nodePoolName: web
    cloudProvider: noop
    offTimeCount: 1
"#,
    )
    .unwrap();
    Arc::new(
        ScalingController::new(config, Arc::new(NoopFactory), reqwest::Client::new())
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_health() {
    let base = serve(controller().await).await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_reports_last_reconcile() {
    let controller = controller().await;
    let base = serve(controller.clone()).await;

    let body: Value = reqwest::get(format!("{base}/api/v1/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["workTime"].is_null());
    assert_eq!(body["pools"][0]["nodePoolName"], "web");
    assert_eq!(body["pools"][0]["managed"], true);

    // Saturday
    controller
        .reconcile_at(Utc.with_ymd_and_hms(2024, 1, 13, 12, 0, 0).unwrap())
        .await;

    let body: Value = reqwest::get(format!("{base}/api/v1/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["workTime"], false);
    assert_eq!(body["lastReconcile"], "2024-01-13T12:00:00Z");
    assert!(body["lastError"].is_null());
    assert!(body["scheduler"].as_str().unwrap().contains("UTC"));
}

#[tokio::test]
async fn test_metrics_exposition() {
    let controller = controller().await;
    controller
        .reconcile_at(Utc.with_ymd_and_hms(2024, 1, 13, 12, 0, 0).unwrap())
        .await;
    let base = serve(controller).await;

    let response = reqwest::get(format!("{base}/metrics")).await.unwrap();
    assert!(response.status().is_success());
    let text = response.text().await.unwrap();
    assert!(text.contains("worktime_scaler_work_time"));
    assert!(text.contains("worktime_scaler_pool_operations_total"));
}
