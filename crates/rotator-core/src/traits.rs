//! Adapter traits for the two control planes
//!
//! The rotation engine works through these interfaces ONLY. Implementations
//! are stateless clients shared by every step of a run.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::{Result, RotatorError};
use crate::types::*;

/// Cloud side: autoscaling groups, instances and the managed-cluster registry
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudInventory: Send + Sync {
    /// All autoscaling groups visible to the credentials, across every page
    async fn list_groups(&self) -> Result<Vec<Group>>;

    /// Exactly one group by name
    async fn describe_group(&self, name: &str) -> Result<Group>;

    /// Every member instance of `group`, in no particular order
    async fn list_instances_for_group(&self, group: &Group) -> Result<Vec<Instance>>;

    /// The instance whose private DNS name is `name`
    async fn find_instance_by_internal_name(&self, name: &str) -> Result<Instance>;

    /// The group currently managing `instance_id`
    async fn find_group_owning_instance(&self, instance_id: &str) -> Result<Group>;

    /// Detach an instance from its group
    ///
    /// With `decrement_desired_capacity` the group shrinks by one; without it
    /// the autoscaler launches a replacement.
    async fn detach(
        &self,
        group: &str,
        instance_id: &str,
        decrement_desired_capacity: bool,
    ) -> Result<()>;

    /// Request termination of an instance. Irreversible.
    async fn terminate(&self, instance_id: &str) -> Result<()>;

    /// The managed cluster whose API endpoint equals `endpoint`
    async fn find_managed_cluster_by_endpoint(&self, endpoint: &str) -> Result<ManagedCluster>;
}

/// Cluster side: nodes, cordon and drain
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// All nodes, unfiltered
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    /// Fresh copy of a single node
    async fn get_node(&self, name: &str) -> Result<ClusterNode>;

    /// Snapshot of current node UIDs
    async fn current_node_set(&self) -> Result<NodeSet> {
        let nodes = self.list_nodes().await?;
        Ok(NodeSet::from_nodes(&nodes))
    }

    /// The node whose provider ID ends with `instance_id`
    async fn find_node_by_instance_id(&self, instance_id: &str) -> Result<ClusterNode> {
        let nodes = self.list_nodes().await?;
        find_node_for_instance(&nodes, instance_id)
            .cloned()
            .ok_or_else(|| RotatorError::not_found("node for instance", instance_id))
    }

    /// Mark a node unschedulable. Idempotent.
    async fn cordon(&self, node: &ClusterNode) -> Result<()>;

    /// Evict the node's workloads within the drain deadline
    async fn drain(&self, node: &ClusterNode) -> Result<()>;
}
