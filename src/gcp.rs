//! Google Cloud plumbing shared by the GKE provider and the Google Calendar source
//!
//! The GCE metadata server tells us which project and cluster we run in and
//! hands out access tokens for the node's service account. [`TokenCache`]
//! keeps a bearer token around until shortly before it expires.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

pub const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth2 token endpoint response (metadata server and oauth2.googleapis.com)
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Single cached bearer token
#[derive(Default)]
pub struct TokenCache {
    current: Mutex<Option<(String, Instant)>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token or run `refresh` to get a new one.
    ///
    /// The lock is held across the refresh so concurrent callers wait for
    /// one exchange instead of racing.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TokenResponse>>,
    {
        let mut current = self.current.lock().await;
        if let Some((token, expires_at)) = current.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        let fresh = refresh().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = fresh.expires_in, "Obtained new access token");
        *current = Some((fresh.access_token.clone(), Instant::now() + lifetime));
        Ok(fresh.access_token)
    }
}

/// Client for the GCE metadata server
#[derive(Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base: String,
}

impl MetadataClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base(http, METADATA_BASE)
    }

    pub fn with_base(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(format!("{}/{}", self.base, path))
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::CloudApi {
                status: response.status().as_u16(),
                message: format!("metadata server lookup of {path} failed"),
            });
        }
        Ok(response)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        Ok(self.get(path).await?.text().await?.trim().to_string())
    }

    pub async fn project_id(&self) -> Result<String> {
        self.get_text("project/project-id").await
    }

    pub async fn cluster_name(&self) -> Result<String> {
        self.get_text("instance/attributes/cluster-name").await
    }

    pub async fn cluster_location(&self) -> Result<String> {
        self.get_text("instance/attributes/cluster-location").await
    }

    /// Access token of the instance's default service account
    pub async fn access_token(&self) -> Result<TokenResponse> {
        Ok(self
            .get("instance/service-accounts/default/token")
            .await?
            .json()
            .await?)
    }
}
