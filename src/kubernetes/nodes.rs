use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
use tracing::{info, instrument, warn};

use super::{NodeOperations, SYSTEM_NAMESPACE};
use crate::error::{Error, Result};

/// True when the node is marked unschedulable
pub fn is_cordoned(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

/// Value of a label on the node, if present and non-empty
pub fn node_label<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.labels()
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// [`NodeOperations`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeNodeOperations {
    client: Client,
}

impl KubeNodeOperations {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeOperations for KubeNodeOperations {
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(Error::KubeError)?;
        Ok(nodes.items)
    }

    #[instrument(skip(self))]
    async fn drain(&self, node_name: &str) -> Result<()> {
        info!("Draining node {}", node_name);

        let pods: Api<Pod> = Api::all(self.client.clone());
        let on_node = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
            .await
            .map_err(Error::KubeError)?;

        for pod in on_node.items {
            let namespace = pod.namespace().unwrap_or_default();
            if namespace == SYSTEM_NAMESPACE {
                continue;
            }
            let name = pod.name_any();
            let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => info!(pod = %name, namespace = %namespace, "Pod deleted"),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => warn!(pod = %name, namespace = %namespace, error = %e, "Failed to delete pod"),
            }
        }

        Ok(())
    }
}
