//! Core types shared by the rotation engine and its adapters
//!
//! Every value here is a snapshot taken from one query against the cloud or
//! the cluster. Relations between them ([`InstanceGroup`], node-for-instance)
//! are computed on demand and never cached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Tag value marking a group as owned by a cluster
pub const OWNED_TAG_VALUE: &str = "owned";

/// Prefix of the ownership tag key carried by cluster-owned groups
pub const CLUSTER_TAG_PREFIX: &str = "k8s.io/cluster/";

/// Node condition type reporting kubelet readiness
pub const NODE_READY_CONDITION: &str = "Ready";

/// A compute instance as reported by the cloud provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance ID (e.g. `i-0123456789abcdef0`)
    pub id: String,

    /// Launch time
    pub launch_time: DateTime<Utc>,

    /// Name of the group managing the instance, if known at query time
    pub group: Option<String>,

    /// Private DNS name (e.g. `ip-10-0-1-5.ec2.internal`)
    pub internal_name: Option<String>,
}

impl Instance {
    /// Create an instance snapshot
    pub fn new(id: impl Into<String>, launch_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            launch_time,
            group: None,
            internal_name: None,
        }
    }

    /// Set the owning group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the private DNS name
    pub fn with_internal_name(mut self, name: impl Into<String>) -> Self {
        self.internal_name = Some(name.into());
        self
    }
}

/// An autoscaling group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group name
    pub name: String,

    /// Tags attached to the group
    pub tags: HashMap<String, String>,

    /// IDs of the member instances
    pub instances: Vec<String>,
}

impl Group {
    /// Create an empty group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: HashMap::new(),
            instances: Vec::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a member instance ID
    pub fn with_instance(mut self, id: impl Into<String>) -> Self {
        self.instances.push(id.into());
        self
    }

    /// Check whether the group carries `key=value`
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.get(key).is_some_and(|v| v == value)
    }
}

/// One instance paired with the group that manages it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroup {
    /// The instance
    pub instance: Instance,

    /// Its owning group
    pub group: Group,
}

impl InstanceGroup {
    /// Pair an instance with its group
    pub fn new(instance: Instance, group: Group) -> Self {
        Self { instance, group }
    }

    /// Pair every instance with the same group
    pub fn pair_all(instances: Vec<Instance>, group: &Group) -> Vec<Self> {
        instances
            .into_iter()
            .map(|instance| Self::new(instance, group.clone()))
            .collect()
    }

    /// Instance ID
    pub fn instance_id(&self) -> &str {
        &self.instance.id
    }

    /// Group name
    pub fn group_id(&self) -> &str {
        &self.group.name
    }
}

/// A node condition (type + status string, as the API server reports them)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    /// Condition type (e.g. `Ready`)
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,
}

impl NodeCondition {
    /// Create a condition
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
        }
    }
}

/// A cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node name
    pub name: String,

    /// Object UID; stable identity across polls even when names are reused
    pub uid: String,

    /// `spec.providerID` (e.g. `aws:///us-east-1a/i-0123456789abcdef0`)
    pub provider_id: Option<String>,

    /// Status conditions
    pub conditions: Vec<NodeCondition>,
}

impl ClusterNode {
    /// Create a node with no provider ID and no conditions
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            provider_id: None,
            conditions: Vec::new(),
        }
    }

    /// Set the provider ID
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Add a status condition
    pub fn with_condition(mut self, type_: &str, status: &str) -> Self {
        self.conditions.push(NodeCondition::new(type_, status));
        self
    }

    /// True when any condition reports `Ready=True`
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == NODE_READY_CONDITION && c.status == "True")
    }

    /// True when the provider ID ends with `instance_id`
    pub fn matches_instance(&self, instance_id: &str) -> bool {
        !instance_id.is_empty()
            && self
                .provider_id
                .as_deref()
                .is_some_and(|p| p.ends_with(instance_id))
    }
}

/// Find the node backing an instance by provider ID suffix
///
/// Duplicate matches are not expected from a healthy cluster; the first one wins.
pub fn find_node_for_instance<'a>(
    nodes: &'a [ClusterNode],
    instance_id: &str,
) -> Option<&'a ClusterNode> {
    nodes.iter().find(|n| n.matches_instance(instance_id))
}

/// Snapshot of node UIDs, used to spot nodes that joined afterwards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet(BTreeSet<String>);

impl NodeSet {
    /// Build a snapshot from a node listing
    pub fn from_nodes(nodes: &[ClusterNode]) -> Self {
        Self(nodes.iter().map(|n| n.uid.clone()).collect())
    }

    /// Check whether a UID was present at snapshot time
    pub fn contains(&self, uid: &str) -> bool {
        self.0.contains(uid)
    }

    /// Number of nodes in the snapshot
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an empty snapshot
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First node in `nodes` that is not part of the snapshot
    pub fn first_unknown<'a>(&self, nodes: &'a [ClusterNode]) -> Option<&'a ClusterNode> {
        nodes.iter().find(|n| !self.contains(&n.uid))
    }
}

/// A managed Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedCluster {
    /// Cluster name
    pub name: String,

    /// API server endpoint
    pub endpoint: String,
}

impl ManagedCluster {
    /// Create a cluster identity
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Tag key carried by groups this cluster owns
    pub fn ownership_tag_key(&self) -> String {
        format!("{}{}", CLUSTER_TAG_PREFIX, self.name)
    }

    /// True when `group` is tagged as owned by this cluster
    pub fn owns(&self, group: &Group) -> bool {
        group.has_tag(&self.ownership_tag_key(), OWNED_TAG_VALUE)
    }
}
