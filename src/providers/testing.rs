//! In-memory doubles for provider tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, NodeSpec};
use kube::api::ObjectMeta;
use serde_json::json;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use super::gke::GkeCluster;
use super::state::{SavedPoolState, StateStore};
use crate::error::{Error, Result};
use crate::kubernetes::{NodeOperations, REGION_LABEL};

/// [`StateStore`] with the same create-if-absent semantics as the ConfigMap store
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, SavedPoolState>>,
}

impl MemoryStateStore {
    pub fn get(&self, pool: &str) -> Option<SavedPoolState> {
        self.records.lock().unwrap().get(pool).cloned()
    }

    pub fn insert(&self, pool: &str, state: SavedPoolState) {
        self.records.lock().unwrap().insert(pool.to_string(), state);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, pool: &str, state: &SavedPoolState) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .entry(pool.to_string())
            .or_insert_with(|| state.clone());
        Ok(())
    }

    async fn load(&self, pool: &str) -> Result<SavedPoolState> {
        self.get(pool).ok_or_else(|| Error::NoSavedState {
            pool: pool.to_string(),
        })
    }
}

pub fn pool_node(name: &str, label: &str, pool: &str, cordoned: bool, region: Option<&str>) -> Node {
    let mut labels = std::collections::BTreeMap::from([(label.to_string(), pool.to_string())]);
    if let Some(region) = region {
        labels.insert(REGION_LABEL.to_string(), region.to_string());
    }
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(cordoned),
            ..Default::default()
        }),
        status: None,
    }
}

/// [`NodeOperations`] over a fixed node list
#[derive(Default)]
pub struct FakeNodes {
    nodes: Mutex<Vec<Node>>,
    drained: Mutex<Vec<String>>,
}

impl FakeNodes {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            drained: Mutex::default(),
        }
    }

    pub fn set(&self, nodes: Vec<Node>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    pub fn drained(&self) -> Vec<String> {
        self.drained.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeOperations for FakeNodes {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>> {
        let (key, value) = label_selector.split_once('=').unwrap_or((label_selector, ""));
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| {
                n.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(key))
                    .is_some_and(|v| v == value)
            })
            .cloned()
            .collect())
    }

    async fn drain(&self, node_name: &str) -> Result<()> {
        self.drained.lock().unwrap().push(node_name.to_string());
        Ok(())
    }
}

/// One GKE node pool as seen by [`FakeContainerApi`]
#[derive(Clone, Debug, PartialEq)]
pub struct FakePool {
    pub name: String,
    /// Nodes per zone, as `setSize` sets it
    pub node_count: i32,
    pub zones: i32,
    /// `(enabled, min, max)`
    pub autoscaling: Option<(bool, i32, i32)>,
}

impl FakePool {
    pub fn fixed(name: &str, node_count: i32) -> Self {
        Self {
            name: name.to_string(),
            node_count,
            zones: 1,
            autoscaling: None,
        }
    }

    /// Pool spread over `zones` zones with `per_zone` nodes in each
    pub fn regional(name: &str, per_zone: i32, zones: i32) -> Self {
        Self {
            zones,
            ..Self::fixed(name, per_zone)
        }
    }

    pub fn autoscaled(name: &str, node_count: i32, min: i32, max: i32) -> Self {
        Self {
            name: name.to_string(),
            node_count,
            zones: 1,
            autoscaling: Some((true, min, max)),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let locations: Vec<String> = (0..self.zones)
            .map(|i| format!("asia-east2-{}", (b'a' + i as u8) as char))
            .collect();
        let mut pool = json!({
            "name": self.name,
            "initialNodeCount": self.node_count,
            "currentNodeCount": self.node_count * self.zones,
            "locations": locations,
        });
        if let Some((enabled, min, max)) = self.autoscaling {
            pool["autoscaling"] = json!({
                "enabled": enabled,
                "minNodeCount": min,
                "maxNodeCount": max,
            });
        }
        pool
    }
}

#[derive(Default)]
struct ContainerState {
    pools: Vec<FakePool>,
    busy: bool,
    mutations: Vec<String>,
}

/// Stateful stand-in for the GKE metadata server and Container API
#[derive(Clone, Default)]
pub struct FakeContainerApi {
    state: Arc<Mutex<ContainerState>>,
}

impl FakeContainerApi {
    pub async fn start(pools: Vec<FakePool>) -> (MockServer, Self) {
        let api = Self::default();
        api.state.lock().unwrap().pools = pools;

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(api.clone())
            .mount(&server)
            .await;
        (server, api)
    }

    pub fn cluster() -> GkeCluster {
        GkeCluster {
            project: "test-project".to_string(),
            location: "asia-east2".to_string(),
            name: "office".to_string(),
        }
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.lock().unwrap().busy = busy;
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn pool(&self, name: &str) -> FakePool {
        self.state
            .lock()
            .unwrap()
            .pools
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .unwrap()
    }

    fn busy_response() -> ResponseTemplate {
        ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "Cluster is running incompatible operation",
                "status": "FAILED_PRECONDITION",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                    "reason": "CLUSTER_ALREADY_HAS_OPERATION"
                }]
            }
        }))
    }
}

impl Respond for FakeContainerApi {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path().to_string();

        if path.ends_with("/service-accounts/default/token") {
            return ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "fake-token", "expires_in": 3600}));
        }

        let mut state = self.state.lock().unwrap();

        if path.ends_with("/nodePools") {
            let pools: Vec<_> = state.pools.iter().map(FakePool::to_json).collect();
            return ResponseTemplate::new(200).set_body_json(json!({ "nodePools": pools }));
        }

        let Some((pool_name, action)) = path.rsplit('/').next().and_then(|s| s.split_once(':')) else {
            return ResponseTemplate::new(404);
        };
        let pool_name = pool_name.to_string();
        let action = action.to_string();

        if state.busy {
            return Self::busy_response();
        }

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let Some(pool) = state.pools.iter_mut().find(|p| p.name == pool_name) else {
            return ResponseTemplate::new(404);
        };

        let mutation = match action.as_str() {
            "setSize" => {
                let count = body["nodeCount"].as_i64().unwrap_or_default() as i32;
                pool.node_count = count;
                format!("setSize:{pool_name}:{count}")
            }
            "setAutoscaling" => {
                let a = &body["autoscaling"];
                let enabled = a["enabled"].as_bool().unwrap_or(false);
                pool.autoscaling = Some((
                    enabled,
                    a["minNodeCount"].as_i64().unwrap_or_default() as i32,
                    a["maxNodeCount"].as_i64().unwrap_or_default() as i32,
                ));
                format!("setAutoscaling:{pool_name}:{enabled}")
            }
            _ => return ResponseTemplate::new(404),
        };
        state.mutations.push(mutation);

        ResponseTemplate::new(200).set_body_json(json!({"name": "operation-1", "status": "RUNNING"}))
    }
}
