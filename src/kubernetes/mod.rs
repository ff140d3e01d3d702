//! Cluster-side helpers used by the cloud providers
//!
//! Providers look up the nodes of a pool through their well-known labels and
//! clear out cordoned nodes before a scale-down.

mod nodes;

pub use nodes::{is_cordoned, node_label, KubeNodeOperations};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;

use crate::error::Result;

/// GKE node pool membership label
pub const GKE_NODEPOOL_LABEL: &str = "cloud.google.com/gke-nodepool";
/// EKS managed node group membership label
pub const EKS_NODEGROUP_LABEL: &str = "eks.amazonaws.com/nodegroup";
/// Well-known region topology label
pub const REGION_LABEL: &str = "topology.kubernetes.io/region";
/// Namespace whose pods are never deleted by a drain
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Node queries and the best-effort drain
#[async_trait]
pub trait NodeOperations: Send + Sync {
    /// List nodes matching a label selector such as `key=value`
    async fn list_nodes(&self, label_selector: &str) -> Result<Vec<Node>>;

    /// Delete every pod on the node outside `kube-system`.
    ///
    /// Individual pod deletion failures are logged and skipped; only a
    /// failure to list the node's pods is returned.
    async fn drain(&self, node_name: &str) -> Result<()>;
}
