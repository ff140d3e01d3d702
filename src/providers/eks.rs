//! Amazon EKS managed node groups
//!
//! Node groups have no separate autoscaling switch; a group whose minimum
//! is below its maximum is treated as autoscaled. Scaling down pins
//! min, desired and max to the off-time count.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_eks::error::DisplayErrorContext;
use aws_sdk_eks::types::NodegroupScalingConfig;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::state::{AutoscalingState, SavedPoolState, StateStore};
use super::{busy_is_soft, CloudProvider, Outcome};
use crate::error::{Error, Result};
use crate::kubernetes::{is_cordoned, node_label, NodeOperations, EKS_NODEGROUP_LABEL, REGION_LABEL};

const ACTIVE_STATUS: &str = "ACTIVE";
const DEFAULT_ACTIVE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeGroupScaling {
    pub min_size: Option<i32>,
    pub max_size: Option<i32>,
    pub desired_size: Option<i32>,
}

impl NodeGroupScaling {
    pub fn autoscaling_enabled(&self) -> bool {
        matches!((self.min_size, self.max_size), (Some(min), Some(max)) if min < max)
    }
}

#[derive(Clone, Debug)]
pub struct NodeGroupInfo {
    pub status: String,
    pub scaling: NodeGroupScaling,
}

/// The two EKS calls the provider needs
#[async_trait]
pub trait NodeGroupApi: Send + Sync {
    /// `None` when the node group does not exist
    async fn describe(&self, cluster: &str, node_group: &str) -> Result<Option<NodeGroupInfo>>;

    /// Fails with [`Error::ClusterBusy`] while another update is in progress
    async fn update_scaling(&self, cluster: &str, node_group: &str, scaling: &NodeGroupScaling) -> Result<()>;
}

/// Builds a region-scoped [`NodeGroupApi`]
#[async_trait]
pub trait NodeGroupApiConnector: Send + Sync {
    async fn connect(&self, region: Option<&str>) -> Result<Arc<dyn NodeGroupApi>>;
}

struct SdkNodeGroupApi {
    client: aws_sdk_eks::Client,
}

#[async_trait]
impl NodeGroupApi for SdkNodeGroupApi {
    async fn describe(&self, cluster: &str, node_group: &str) -> Result<Option<NodeGroupInfo>> {
        let output = match self
            .client
            .describe_nodegroup()
            .cluster_name(cluster)
            .nodegroup_name(node_group)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let err = e.into_service_error();
                if err.is_resource_not_found_exception() {
                    return Ok(None);
                }
                return Err(Error::AwsError(DisplayErrorContext(&err).to_string()));
            }
        };

        Ok(output.nodegroup().map(|ng| NodeGroupInfo {
            status: ng.status().map(|s| s.as_str().to_string()).unwrap_or_default(),
            scaling: ng
                .scaling_config()
                .map(|s| NodeGroupScaling {
                    min_size: s.min_size(),
                    max_size: s.max_size(),
                    desired_size: s.desired_size(),
                })
                .unwrap_or_default(),
        }))
    }

    async fn update_scaling(&self, cluster: &str, node_group: &str, scaling: &NodeGroupScaling) -> Result<()> {
        let config = NodegroupScalingConfig::builder()
            .set_min_size(scaling.min_size)
            .set_max_size(scaling.max_size)
            .set_desired_size(scaling.desired_size)
            .build();

        match self
            .client
            .update_nodegroup_config()
            .cluster_name(cluster)
            .nodegroup_name(node_group)
            .scaling_config(config)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = e.into_service_error();
                let message = DisplayErrorContext(&err).to_string();
                if err.is_resource_in_use_exception() {
                    Err(Error::ClusterBusy(message))
                } else {
                    Err(Error::AwsError(message))
                }
            }
        }
    }
}

/// Connects with the default AWS credential chain
pub struct SdkConnector;

#[async_trait]
impl NodeGroupApiConnector for SdkConnector {
    async fn connect(&self, region: Option<&str>) -> Result<Arc<dyn NodeGroupApi>> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;
        Ok(Arc::new(SdkNodeGroupApi {
            client: aws_sdk_eks::Client::new(&config),
        }))
    }
}

pub struct EksProvider {
    cluster_name: String,
    connector: Arc<dyn NodeGroupApiConnector>,
    clients: RwLock<HashMap<String, Arc<dyn NodeGroupApi>>>,
    nodes: Arc<dyn NodeOperations>,
    state: Arc<dyn StateStore>,
    active_timeout: Duration,
    poll_interval: Duration,
}

impl EksProvider {
    pub fn new(
        cluster_name: impl Into<String>,
        connector: Arc<dyn NodeGroupApiConnector>,
        nodes: Arc<dyn NodeOperations>,
        state: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let cluster_name = cluster_name.into();
        if cluster_name.is_empty() {
            return Err(Error::ConfigError(
                "EKS_CLUSTER_NAME is required for the aws provider".to_string(),
            ));
        }
        Ok(Self {
            cluster_name,
            connector,
            clients: RwLock::new(HashMap::new()),
            nodes,
            state,
            active_timeout: DEFAULT_ACTIVE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_active_wait(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.active_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Region-scoped client, created at most once per region
    async fn client_for(&self, region: Option<&str>) -> Result<Arc<dyn NodeGroupApi>> {
        let key = region.unwrap_or_default().to_string();
        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        debug!(region = %key, "Creating EKS client");
        let client = self.connector.connect(region).await?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn wait_for_active(&self, api: &dyn NodeGroupApi, node_group: &str) -> Result<()> {
        let deadline = Instant::now() + self.active_timeout;
        loop {
            match api.describe(&self.cluster_name, node_group).await? {
                Some(info) if info.status == ACTIVE_STATUS => return Ok(()),
                Some(info) => debug!(node_group, status = %info.status, "Waiting for node group to become active"),
                None => return Err(not_found(node_group)),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "node group {node_group} did not become active within {:?}",
                    self.active_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn not_found(node_group: &str) -> Error {
    Error::AwsError(format!("node group {node_group} not found"))
}

impl EksProvider {
    async fn shrink(&self, pool: &str, count: i32) -> Result<()> {
        let nodes = self
            .nodes
            .list_nodes(&format!("{EKS_NODEGROUP_LABEL}={pool}"))
            .await?;
        if nodes.len() == count as usize {
            debug!(node_group = pool, size = count, "Node group already at desired size");
            return Ok(());
        }

        let region = nodes.iter().find_map(|n| node_label(n, REGION_LABEL)).map(str::to_string);
        let api = self.client_for(region.as_deref()).await?;

        let Some(current) = api.describe(&self.cluster_name, pool).await? else {
            warn!(node_group = pool, "Node group not found");
            return Ok(());
        };
        info!(node_group = pool, status = %current.status, "Current node group status");

        for node in nodes.iter().filter(|n| is_cordoned(n)) {
            let name = node.metadata.name.as_deref().unwrap_or_default();
            self.nodes.drain(name).await?;
        }

        let saved = SavedPoolState {
            node_count: current.scaling.desired_size.unwrap_or(nodes.len() as i32),
            autoscaling: Some(AutoscalingState {
                enabled: current.scaling.autoscaling_enabled(),
                min_size: current.scaling.min_size,
                max_size: current.scaling.max_size,
            }),
            region: region.clone(),
        };
        self.state.save(pool, &saved).await?;

        self.wait_for_active(api.as_ref(), pool).await?;

        let pinned = NodeGroupScaling {
            min_size: Some(count),
            max_size: Some(count.max(1)),
            desired_size: Some(count),
        };
        api.update_scaling(&self.cluster_name, pool, &pinned).await?;
        info!(node_group = pool, count, "Scaled node group");
        Ok(())
    }

    async fn put_back(&self, pool: &str) -> Result<()> {
        let saved = self.state.load(pool).await?;

        let region = match saved.region.clone() {
            Some(region) => Some(region),
            None => self
                .nodes
                .list_nodes(&format!("{EKS_NODEGROUP_LABEL}={pool}"))
                .await?
                .iter()
                .find_map(|n| node_label(n, REGION_LABEL))
                .map(str::to_string),
        };
        let api = self.client_for(region.as_deref()).await?;

        let Some(current) = api.describe(&self.cluster_name, pool).await? else {
            return Err(not_found(pool));
        };

        let (min_size, max_size) = saved
            .autoscaling
            .as_ref()
            .map(|a| (a.min_size, a.max_size))
            .unwrap_or_default();
        let min_size = min_size.unwrap_or(saved.node_count);
        let max_size = max_size.unwrap_or(saved.node_count).max(min_size);
        let restored = NodeGroupScaling {
            min_size: Some(min_size),
            max_size: Some(max_size),
            desired_size: Some(saved.node_count.clamp(min_size, max_size)),
        };

        // an autoscaled group owns its desired size, only the bounds must match
        let bounds_match = current.scaling.min_size == restored.min_size
            && current.scaling.max_size == restored.max_size;
        let count_matches =
            saved.autoscaling_enabled() || current.scaling.desired_size == restored.desired_size;
        if bounds_match && count_matches {
            debug!(node_group = pool, "Node group already at desired state");
            return Ok(());
        }

        self.wait_for_active(api.as_ref(), pool).await?;
        api.update_scaling(&self.cluster_name, pool, &restored).await?;
        info!(
            node_group = pool,
            desired_size = saved.node_count,
            "Restored node group configuration"
        );
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for EksProvider {
    #[instrument(skip(self), fields(provider = "aws", cluster = %self.cluster_name))]
    async fn scale_down(&self, pool: &str, count: i32) -> Result<Outcome> {
        busy_is_soft(pool, self.shrink(pool, count).await)
    }

    #[instrument(skip(self), fields(provider = "aws", cluster = %self.cluster_name))]
    async fn restore(&self, pool: &str) -> Result<Outcome> {
        busy_is_soft(pool, self.put_back(pool).await)
    }

    fn kind(&self) -> &'static str {
        "aws"
    }
}
