//! Kubernetes cluster inventory
//!
//! Nodes are read straight from the API server on every call; nothing is
//! cached between steps. The client comes from the local kubeconfig, and the
//! same kubeconfig's server URL is what cluster discovery matches against the
//! managed-cluster registry.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use rotator_core::{ClusterInventory, ClusterNode, Result, RotatorError};
use serde_json::json;
use tracing::{debug, info};

use crate::drain::{DrainConfig, NodeDrainer};

/// Cluster inventory over the Kubernetes API
#[derive(Clone)]
pub struct KubeInventory {
    nodes: Api<Node>,
    drainer: NodeDrainer,
}

impl KubeInventory {
    /// Create from an existing client
    pub fn new(client: Client, drain: DrainConfig) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            drainer: NodeDrainer::new(client, drain),
        }
    }

    /// Build from the local kubeconfig, optionally selecting a context
    ///
    /// Returns the inventory and the API server URL it talks to.
    pub async fn from_kubeconfig(
        context: Option<String>,
        drain: DrainConfig,
    ) -> Result<(Self, String)> {
        let options = KubeConfigOptions {
            context,
            ..Default::default()
        };
        let config = Config::from_kubeconfig(&options)
            .await
            .map_err(|e| RotatorError::config(format!("failed to load kubeconfig: {e}")))?;

        let endpoint = config.cluster_url.to_string();
        let client = Client::try_from(config)
            .map_err(|e| RotatorError::config(format!("failed to create cluster client: {e}")))?;

        info!(endpoint = %endpoint, "Connected to cluster");
        Ok((Self::new(client, drain), endpoint))
    }
}

/// Convert an API node; `None` without a name or UID
pub fn node_from_k8s(node: &Node) -> Option<ClusterNode> {
    let name = node.metadata.name.as_deref()?;
    let uid = node.metadata.uid.as_deref()?;

    let mut converted = ClusterNode::new(name, uid);
    if let Some(provider_id) = node.spec.as_ref().and_then(|s| s.provider_id.as_deref()) {
        converted = converted.with_provider_id(provider_id);
    }
    let conditions = node.status.as_ref().and_then(|s| s.conditions.as_ref());
    for condition in conditions.into_iter().flatten() {
        converted = converted.with_condition(&condition.type_, &condition.status);
    }
    Some(converted)
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

#[async_trait]
impl ClusterInventory for KubeInventory {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let list = self
            .nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| RotatorError::cluster_query("list nodes", e))?;

        let nodes: Vec<ClusterNode> = list.items.iter().filter_map(node_from_k8s).collect();
        debug!(node_count = nodes.len(), "Listed cluster nodes");
        Ok(nodes)
    }

    async fn get_node(&self, name: &str) -> Result<ClusterNode> {
        let node = self.nodes.get(name).await.map_err(|e| {
            if is_not_found(&e) {
                RotatorError::not_found("node", name)
            } else {
                RotatorError::cluster_query("get node", e)
            }
        })?;
        node_from_k8s(&node).ok_or_else(|| RotatorError::not_found("node", name))
    }

    async fn cordon(&self, node: &ClusterNode) -> Result<()> {
        let patch = json!({ "spec": { "unschedulable": true } });
        self.nodes
            .patch(&node.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| RotatorError::cluster_action("cordon node", e))?;

        info!(node = %node.name, "Node cordoned");
        Ok(())
    }

    async fn drain(&self, node: &ClusterNode) -> Result<()> {
        self.drainer.drain(&node.name).await.map(|_| ())
    }
}
