//! Cloud scaling providers
//!
//! Every provider implements the same two operations: shrink a pool to its
//! off-time size after saving what it looked like, and put the saved
//! configuration back. A conflicting operation in flight is not an error:
//! the call ends with [`Outcome::Busy`] and the next reconcile tick retries.

mod azure;
mod eks;
mod gke;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use azure::AzureProvider;
pub use eks::{EksProvider, NodeGroupApi, NodeGroupApiConnector, NodeGroupInfo, NodeGroupScaling, SdkConnector};
pub use gke::{GkeCluster, GkeProvider, CONTAINER_API};
pub use state::{
    state_config_map_name, AutoscalingState, ConfigMapStateStore, SavedPoolState, StateStore,
    STATE_CONFIG_MAP_PREFIX, STATE_DATA_KEY,
};

use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;
use tracing::info;

use crate::error::{Error, Result};
use crate::kubernetes::{KubeNodeOperations, NodeOperations};

/// How a scale-down or restore call ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The pool is in the requested state, or nothing had to change
    Done,
    /// The cloud API refused because another operation is running
    Busy,
}

/// Turn a cluster-busy refusal into [`Outcome::Busy`]
pub(crate) fn busy_is_soft(pool: &str, result: Result<()>) -> Result<Outcome> {
    match result {
        Ok(()) => Ok(Outcome::Done),
        Err(e) if e.is_cluster_busy() => {
            info!(node_pool = pool, error = %e, "Cluster is busy, will retry in next reconciliation");
            Ok(Outcome::Busy)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Shrink `pool` to `count` nodes, saving its configuration first
    async fn scale_down(&self, pool: &str, count: i32) -> Result<Outcome>;

    /// Put back the configuration saved by the last scale-down
    async fn restore(&self, pool: &str) -> Result<Outcome>;

    fn kind(&self) -> &'static str;
}

/// Creates providers by configuration kind
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(&self, kind: &str) -> Result<Arc<dyn CloudProvider>>;
}

/// Builds the real providers from the in-cluster environment
#[derive(Clone)]
pub struct CloudProviderFactory {
    client: Client,
    namespace: String,
    eks_cluster_name: Option<String>,
    http: reqwest::Client,
}

impl CloudProviderFactory {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        eks_cluster_name: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            eks_cluster_name,
            http,
        }
    }

    fn nodes(&self) -> Arc<dyn NodeOperations> {
        Arc::new(KubeNodeOperations::new(self.client.clone()))
    }

    fn state(&self) -> Arc<dyn StateStore> {
        Arc::new(ConfigMapStateStore::new(self.client.clone(), &self.namespace))
    }
}

#[async_trait]
impl ProviderFactory for CloudProviderFactory {
    async fn create(&self, kind: &str) -> Result<Arc<dyn CloudProvider>> {
        match kind {
            "gke" => Ok(Arc::new(
                GkeProvider::discover(self.http.clone(), self.nodes(), self.state()).await?,
            )),
            "aws" => Ok(Arc::new(EksProvider::new(
                self.eks_cluster_name.clone().unwrap_or_default(),
                Arc::new(SdkConnector),
                self.nodes(),
                self.state(),
            )?)),
            "azure" => Ok(Arc::new(AzureProvider)),
            other => Err(Error::UnsupportedProvider {
                kind: other.to_string(),
            }),
        }
    }
}
