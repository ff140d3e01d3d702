//! Google Kubernetes Engine node pools
//!
//! Talks to the Container API v1 REST endpoints with the node's service
//! account token from the metadata server.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::state::{AutoscalingState, SavedPoolState, StateStore};
use super::{busy_is_soft, CloudProvider, Outcome};
use crate::error::{Error, Result};
use crate::gcp::{MetadataClient, TokenCache};
use crate::kubernetes::{is_cordoned, NodeOperations, GKE_NODEPOOL_LABEL};

pub const CONTAINER_API: &str = "https://container.googleapis.com/v1";

const CLUSTER_BUSY_REASON: &str = "CLUSTER_ALREADY_HAS_OPERATION";

/// Fully qualified cluster location
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GkeCluster {
    pub project: String,
    pub location: String,
    pub name: String,
}

impl GkeCluster {
    fn resource_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/clusters/{}",
            self.project, self.location, self.name
        )
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolAutoscaling {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_node_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_node_count: Option<i32>,
}

/// A node pool as listed by the Container API.
///
/// `initialNodeCount` is per zone, the unit `setSize` takes;
/// `currentNodeCount` sums all zones of a regional pool.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePool {
    pub name: String,
    #[serde(default)]
    pub initial_node_count: i32,
    pub current_node_count: Option<i32>,
    #[serde(default)]
    pub locations: Vec<String>,
    pub autoscaling: Option<NodePoolAutoscaling>,
}

impl NodePool {
    fn autoscaling_enabled(&self) -> bool {
        self.autoscaling.as_ref().is_some_and(|a| a.enabled)
    }

    fn saved_state(&self) -> SavedPoolState {
        SavedPoolState {
            node_count: self.initial_node_count,
            autoscaling: self.autoscaling.as_ref().map(|a| AutoscalingState {
                enabled: a.enabled,
                min_size: a.min_node_count,
                max_size: a.max_node_count,
            }),
            region: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodePoolList {
    #[serde(default)]
    node_pools: Vec<NodePool>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

/// Map a failed response to [`Error::ClusterBusy`] or [`Error::CloudApi`]
async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(&body) else {
        return Error::CloudApi {
            status,
            message: body,
        };
    };

    let busy = status == 400
        && envelope
            .error
            .details
            .iter()
            .any(|d| d.get("reason").and_then(|r| r.as_str()) == Some(CLUSTER_BUSY_REASON));
    if busy {
        Error::ClusterBusy(envelope.error.message)
    } else {
        Error::CloudApi {
            status,
            message: envelope.error.message,
        }
    }
}

pub struct GkeProvider {
    http: reqwest::Client,
    api_base: String,
    metadata: MetadataClient,
    token: TokenCache,
    cluster: GkeCluster,
    nodes: Arc<dyn NodeOperations>,
    state: Arc<dyn StateStore>,
}

impl GkeProvider {
    pub fn new(
        http: reqwest::Client,
        metadata: MetadataClient,
        cluster: GkeCluster,
        nodes: Arc<dyn NodeOperations>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            http,
            api_base: CONTAINER_API.to_string(),
            metadata,
            token: TokenCache::new(),
            cluster,
            nodes,
            state,
        }
    }

    /// Discover project, cluster and location from the metadata server
    pub async fn discover(
        http: reqwest::Client,
        nodes: Arc<dyn NodeOperations>,
        state: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let metadata = MetadataClient::new(http.clone());
        let cluster = GkeCluster {
            project: metadata.project_id().await?,
            name: metadata.cluster_name().await?,
            location: metadata.cluster_location().await?,
        };
        info!(
            project_id = %cluster.project,
            cluster = %cluster.name,
            location = %cluster.location,
            "GKE provider initialized"
        );
        Ok(Self::new(http, metadata, cluster, nodes, state))
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn bearer(&self) -> Result<String> {
        self.token
            .get_or_refresh(|| self.metadata.access_token())
            .await
    }

    fn pool_url(&self, pool: &str, action: &str) -> String {
        format!(
            "{}/{}/nodePools/{}:{}",
            self.api_base,
            self.cluster.resource_path(),
            pool,
            action
        )
    }

    async fn list_node_pools(&self) -> Result<Vec<NodePool>> {
        let url = format!("{}/{}/nodePools", self.api_base, self.cluster.resource_path());
        let response = self.http.get(url).bearer_auth(self.bearer().await?).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json::<NodePoolList>().await?.node_pools)
    }

    async fn find_pool(&self, pool: &str) -> Result<Option<NodePool>> {
        Ok(self
            .list_node_pools()
            .await?
            .into_iter()
            .find(|p| p.name == pool))
    }

    async fn post(&self, url: String, body: serde_json::Value) -> Result<()> {
        let response = self
            .http
            .post(url)
            .bearer_auth(self.bearer().await?)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    async fn set_size(&self, pool: &str, count: i32) -> Result<()> {
        self.post(self.pool_url(pool, "setSize"), json!({ "nodeCount": count }))
            .await
    }

    async fn set_autoscaling(&self, pool: &str, autoscaling: NodePoolAutoscaling) -> Result<()> {
        self.post(
            self.pool_url(pool, "setAutoscaling"),
            json!({ "autoscaling": autoscaling }),
        )
        .await
    }
}

impl GkeProvider {
    async fn shrink(&self, pool: &str, count: i32) -> Result<()> {
        let Some(node_pool) = self.find_pool(pool).await? else {
            warn!(node_pool = pool, "Node pool not found");
            return Ok(());
        };
        debug!(
            node_pool = pool,
            per_zone = node_pool.initial_node_count,
            total = ?node_pool.current_node_count,
            zones = node_pool.locations.len(),
            "Current node pool size"
        );

        let nodes = self
            .nodes
            .list_nodes(&format!("{GKE_NODEPOOL_LABEL}={pool}"))
            .await?;
        if nodes.len() == count as usize {
            debug!(node_pool = pool, size = count, "Node pool already at desired size");
            return Ok(());
        }

        for node in nodes.iter().filter(|n| is_cordoned(n)) {
            let name = node.metadata.name.as_deref().unwrap_or_default();
            self.nodes.drain(name).await?;
        }

        self.state.save(pool, &node_pool.saved_state()).await?;

        if node_pool.autoscaling_enabled() {
            info!(node_pool = pool, "Disabling autoscaling before scaling node pool");
            let disabled = NodePoolAutoscaling {
                enabled: false,
                ..Default::default()
            };
            self.set_autoscaling(pool, disabled).await?;
        }

        self.set_size(pool, count).await?;
        info!(node_pool = pool, count, "Scaled node pool");
        Ok(())
    }

    async fn put_back(&self, pool: &str) -> Result<()> {
        let saved = self.state.load(pool).await?;

        let Some(current) = self.find_pool(pool).await? else {
            return Err(Error::CloudApi {
                status: 404,
                message: format!("node pool {pool} not found"),
            });
        };

        let autoscaling_matches = saved.autoscaling_enabled() == current.autoscaling_enabled();
        let count_matches =
            saved.autoscaling_enabled() || current.initial_node_count == saved.node_count;
        if autoscaling_matches && count_matches {
            debug!(
                node_pool = pool,
                node_count = saved.node_count,
                autoscaling_enabled = saved.autoscaling_enabled(),
                "Node pool already at desired state"
            );
            return Ok(());
        }

        if let Some(autoscaling) = saved.autoscaling.as_ref().filter(|a| a.enabled) {
            let restored = NodePoolAutoscaling {
                enabled: true,
                min_node_count: autoscaling.min_size,
                max_node_count: autoscaling.max_size,
            };
            self.set_autoscaling(pool, restored).await?;
            info!(node_pool = pool, "Restored autoscaling settings");
            return Ok(());
        }

        if current.autoscaling_enabled() {
            self.set_autoscaling(pool, NodePoolAutoscaling::default()).await?;
        }

        self.set_size(pool, saved.node_count).await?;
        info!(node_pool = pool, count = saved.node_count, "Restored node count");
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for GkeProvider {
    #[instrument(skip(self), fields(provider = "gke"))]
    async fn scale_down(&self, pool: &str, count: i32) -> Result<Outcome> {
        busy_is_soft(pool, self.shrink(pool, count).await)
    }

    #[instrument(skip(self), fields(provider = "gke"))]
    async fn restore(&self, pool: &str) -> Result<Outcome> {
        busy_is_soft(pool, self.put_back(pool).await)
    }

    fn kind(&self) -> &'static str {
        "gke"
    }
}
