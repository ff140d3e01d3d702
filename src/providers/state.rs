//! Saved pool state
//!
//! Before a pool is scaled down its size and autoscaling settings are stored
//! in a ConfigMap so they can be put back at the start of the next work
//! period. Saving never overwrites an existing record.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

pub const STATE_CONFIG_MAP_PREFIX: &str = "worktime-scaler-nodepool-";
pub const STATE_DATA_KEY: &str = "config";

/// Autoscaling settings captured before a scale-down
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<i32>,
}

/// A pool's configuration as it was before the last scale-down
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPoolState {
    #[serde(alias = "desiredSize")]
    pub node_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingState>,
    /// Region of the node group (EKS only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl SavedPoolState {
    pub fn autoscaling_enabled(&self) -> bool {
        self.autoscaling.as_ref().is_some_and(|a| a.enabled)
    }
}

/// Name of the ConfigMap holding a pool's saved state
pub fn state_config_map_name(pool: &str) -> String {
    format!("{STATE_CONFIG_MAP_PREFIX}{pool}")
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist the state unless a record for the pool already exists
    async fn save(&self, pool: &str, state: &SavedPoolState) -> Result<()>;

    /// Load the saved state, failing with [`Error::NoSavedState`] if there is none
    async fn load(&self, pool: &str) -> Result<SavedPoolState>;
}

/// [`StateStore`] backed by one ConfigMap per pool
#[derive(Clone)]
pub struct ConfigMapStateStore {
    client: Client,
    namespace: String,
}

impl ConfigMapStateStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl StateStore for ConfigMapStateStore {
    #[instrument(skip(self, state), fields(namespace = %self.namespace))]
    async fn save(&self, pool: &str, state: &SavedPoolState) -> Result<()> {
        let name = state_config_map_name(pool);
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    "worktime-scaler".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                STATE_DATA_KEY.to_string(),
                serde_json::to_string(state)?,
            )])),
            ..Default::default()
        };

        match self.api().create(&PostParams::default(), &config_map).await {
            Ok(_) => {
                info!(node_pool = pool, config_map = %name, "Saved node pool configuration");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(node_pool = pool, config_map = %name, "Saved state already exists, keeping it");
                Ok(())
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn load(&self, pool: &str) -> Result<SavedPoolState> {
        let name = state_config_map_name(pool);
        let config_map = match self.api().get(&name).await {
            Ok(cm) => cm,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::NoSavedState {
                    pool: pool.to_string(),
                })
            }
            Err(e) => return Err(Error::KubeError(e)),
        };

        let data = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(STATE_DATA_KEY))
            .ok_or_else(|| Error::NoSavedState {
                pool: pool.to_string(),
            })?;
        Ok(serde_json::from_str(data)?)
    }
}
