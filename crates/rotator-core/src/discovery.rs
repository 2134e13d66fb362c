//! Cluster discovery
//!
//! Finds the autoscaling groups owned by the cluster the tool is pointed at.
//!
//! ## How It Works
//!
//! 1. The configured API endpoint is matched against the provider's
//!    managed-cluster registry to get the cluster name
//! 2. The ownership tag key is derived from the name: `k8s.io/cluster/<name>`
//! 3. Every group carrying that key with value `owned` belongs to the cluster
//!
//! Finding no owned group is treated as a misconfiguration, not a no-op.

use tracing::{debug, info};

use crate::error::{Result, RotatorError};
use crate::traits::CloudInventory;
use crate::types::{Group, ManagedCluster};

/// Normalize an API endpoint for comparison
///
/// Kubeconfig URLs often come back with a trailing `/` that the provider's
/// registry does not carry.
pub fn normalize_endpoint(endpoint: &str) -> &str {
    endpoint.trim().trim_end_matches('/')
}

/// Resolve the managed cluster serving `endpoint`
pub async fn resolve_cluster(
    cloud: &dyn CloudInventory,
    endpoint: &str,
) -> Result<ManagedCluster> {
    let endpoint = normalize_endpoint(endpoint);
    debug!(endpoint = %endpoint, "Resolving managed cluster by endpoint");

    let cluster = cloud.find_managed_cluster_by_endpoint(endpoint).await?;
    info!(cluster = %cluster.name, endpoint = %endpoint, "Resolved current cluster");
    Ok(cluster)
}

/// Keep only the groups owned by `cluster`
pub fn select_owned_groups(groups: Vec<Group>, cluster: &ManagedCluster) -> Vec<Group> {
    groups
        .into_iter()
        .filter(|group| {
            let owned = cluster.owns(group);
            if owned {
                info!(group = %group.name, cluster = %cluster.name, "ASG is owned by cluster");
            }
            owned
        })
        .collect()
}

/// Find every group owned by the cluster at `endpoint`
///
/// Fails with [`RotatorError::NoOwnedGroups`] when nothing matches.
pub async fn discover_owned_groups(
    cloud: &dyn CloudInventory,
    endpoint: &str,
) -> Result<(ManagedCluster, Vec<Group>)> {
    let cluster = resolve_cluster(cloud, endpoint).await?;
    let groups = cloud.list_groups().await?;
    debug!(group_count = groups.len(), "Scanning groups for ownership tag");

    let owned = select_owned_groups(groups, &cluster);
    if owned.is_empty() {
        return Err(RotatorError::NoOwnedGroups {
            cluster: cluster.name,
        });
    }
    Ok((cluster, owned))
}
