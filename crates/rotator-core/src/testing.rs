//! In-memory cloud + cluster used by the engine tests
//!
//! A single fake backs both adapter traits so a detach can make a
//! replacement node appear. Every call the engine makes is appended to one
//! ordered log.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{exactly_one, Result, RotatorError};
use crate::traits::{CloudInventory, ClusterInventory};
use crate::types::*;

/// One adapter call, as seen by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindNode(String),
    Cordon(String),
    Snapshot,
    Detach {
        group: String,
        instance: String,
        decrement: bool,
    },
    ListNodes,
    GetNode(String),
    Drain(String),
    Terminate(String),
}

impl Call {
    /// True for calls that change cloud or cluster state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Cordon(_) | Call::Detach { .. } | Call::Drain(_) | Call::Terminate(_)
        )
    }
}

#[derive(Default)]
struct State {
    groups: Vec<Group>,
    instances: Vec<Instance>,
    clusters: Vec<ManagedCluster>,
    nodes: Vec<ClusterNode>,
    calls: Vec<Call>,
    replacements_become_ready: bool,
    fail_drain: bool,
    cancel_on_drain: Option<CancellationToken>,
}

/// Fake cloud + cluster
#[derive(Clone)]
pub struct FakeEnvironment {
    state: Arc<Mutex<State>>,
}

/// Launch time `secs` after a fixed epoch
pub fn launched_at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Node name the fake gives an instance
pub fn node_name(instance_id: &str) -> String {
    format!("node-{instance_id}")
}

impl Default for FakeEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEnvironment {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                replacements_become_ready: true,
                ..Default::default()
            })),
        }
    }

    /// Add a group with members `(instance_id, launch offset secs)`, each backed by a ready node
    pub fn with_group(self, name: &str, tags: &[(&str, &str)], members: &[(&str, i64)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let mut group = Group::new(name);
            for (k, v) in tags {
                group = group.with_tag(*k, *v);
            }
            for (id, secs) in members {
                group = group.with_instance(*id);
                state.instances.push(
                    Instance::new(*id, launched_at(*secs))
                        .with_group(name)
                        .with_internal_name(format!("ip-{id}.ec2.internal")),
                );
                state.nodes.push(
                    ClusterNode::new(node_name(id), format!("uid-{id}"))
                        .with_provider_id(format!("aws:///us-east-1a/{id}"))
                        .with_condition("Ready", "True"),
                );
            }
            state.groups.push(group);
        }
        self
    }

    /// Override the private DNS name of an instance
    pub fn with_internal_name(self, instance_id: &str, dns: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(instance) = state.instances.iter_mut().find(|i| i.id == instance_id) {
                instance.internal_name = Some(dns.to_string());
            }
        }
        self
    }

    /// Register a managed cluster
    pub fn with_cluster(self, name: &str, endpoint: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .clusters
            .push(ManagedCluster::new(name, endpoint));
        self
    }

    /// Remove the node backing an instance
    pub fn without_node(self, instance_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .nodes
            .retain(|n| !n.matches_instance(instance_id));
        self
    }

    /// Replacement nodes join but never report Ready
    pub fn replacements_never_ready(self) -> Self {
        self.state.lock().unwrap().replacements_become_ready = false;
        self
    }

    /// Every drain fails
    pub fn failing_drain(self) -> Self {
        self.state.lock().unwrap().fail_drain = true;
        self
    }

    /// Fire `token` whenever a drain starts
    pub fn cancelling_on_drain(self, token: CancellationToken) -> Self {
        self.state.lock().unwrap().cancel_on_drain = Some(token);
        self
    }

    /// Ordered call log
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Instances terminated, in order
    pub fn terminated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Terminate(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Mutating calls only
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl CloudInventory for FakeEnvironment {
    async fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.state.lock().unwrap().groups.clone())
    }

    async fn describe_group(&self, name: &str) -> Result<Group> {
        let state = self.state.lock().unwrap();
        let matches: Vec<Group> = state.groups.iter().filter(|g| g.name == name).cloned().collect();
        exactly_one(matches, "ASG", name)
    }

    async fn list_instances_for_group(&self, group: &Group) -> Result<Vec<Instance>> {
        // Newest first, so callers cannot rely on query order
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .iter()
            .rev()
            .filter(|i| group.instances.contains(&i.id))
            .cloned()
            .collect())
    }

    async fn find_instance_by_internal_name(&self, name: &str) -> Result<Instance> {
        let state = self.state.lock().unwrap();
        state
            .instances
            .iter()
            .find(|i| i.internal_name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| RotatorError::not_found("instance with internal DNS", name))
    }

    async fn find_group_owning_instance(&self, instance_id: &str) -> Result<Group> {
        let state = self.state.lock().unwrap();
        state
            .groups
            .iter()
            .find(|g| g.instances.iter().any(|i| i == instance_id))
            .cloned()
            .ok_or_else(|| RotatorError::not_found("ASG for instance", instance_id))
    }

    async fn detach(&self, group: &str, instance_id: &str, decrement: bool) -> Result<()> {
        self.record(Call::Detach {
            group: group.to_string(),
            instance: instance_id.to_string(),
            decrement,
        });

        let mut state = self.state.lock().unwrap();
        for g in state.groups.iter_mut().filter(|g| g.name == group) {
            g.instances.retain(|i| i != instance_id);
        }
        if !decrement {
            let status = if state.replacements_become_ready { "True" } else { "False" };
            let replacement = ClusterNode::new(
                format!("replacement-{instance_id}"),
                format!("uid-replacement-{instance_id}"),
            )
            .with_condition("Ready", status);
            state.nodes.push(replacement);
        }
        Ok(())
    }

    async fn terminate(&self, instance_id: &str) -> Result<()> {
        self.record(Call::Terminate(instance_id.to_string()));
        Ok(())
    }

    async fn find_managed_cluster_by_endpoint(&self, endpoint: &str) -> Result<ManagedCluster> {
        let state = self.state.lock().unwrap();
        state
            .clusters
            .iter()
            .find(|c| c.endpoint == endpoint)
            .cloned()
            .ok_or_else(|| RotatorError::not_found("EKS cluster with endpoint", endpoint))
    }
}

#[async_trait]
impl ClusterInventory for FakeEnvironment {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        self.record(Call::ListNodes);
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn get_node(&self, name: &str) -> Result<ClusterNode> {
        self.record(Call::GetNode(name.to_string()));
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| RotatorError::not_found("node", name))
    }

    async fn current_node_set(&self) -> Result<NodeSet> {
        self.record(Call::Snapshot);
        Ok(NodeSet::from_nodes(&self.state.lock().unwrap().nodes))
    }

    async fn find_node_by_instance_id(&self, instance_id: &str) -> Result<ClusterNode> {
        self.record(Call::FindNode(instance_id.to_string()));
        let state = self.state.lock().unwrap();
        find_node_for_instance(&state.nodes, instance_id)
            .cloned()
            .ok_or_else(|| RotatorError::not_found("node for instance", instance_id))
    }

    async fn cordon(&self, node: &ClusterNode) -> Result<()> {
        self.record(Call::Cordon(node.name.clone()));
        Ok(())
    }

    async fn drain(&self, node: &ClusterNode) -> Result<()> {
        self.record(Call::Drain(node.name.clone()));
        let state = self.state.lock().unwrap();
        if let Some(token) = &state.cancel_on_drain {
            token.cancel();
        }
        if state.fail_drain {
            return Err(RotatorError::drain(&node.name, "timed out after 600s"));
        }
        Ok(())
    }
}
