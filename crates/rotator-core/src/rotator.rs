//! Node rotation engine
//!
//! Replaces the instances behind a node pool one at a time:
//!
//! ```text
//! Instance (oldest first)
//!     │
//!     ├── 1. Resolve:   instance → node (provider ID suffix)
//!     │                 [dry run stops here]
//!     ├── 2. Cordon:    no new pods land on the node
//!     │
//!     ├── 3. Snapshot:  record node UIDs, strictly between cordon and detach
//!     │
//!     ├── 4. Detach:    leave the ASG (decrement capacity only when removing)
//!     │
//!     ├── 5. Await:     replacement joins and reports Ready (skipped when removing)
//!     │
//!     ├── 6. Drain:     evict workloads from the old node
//!     │
//!     └── 7. Terminate: point of no return, not verified or retried
//! ```
//!
//! ## Key Design Decisions
//!
//! - **Sequential**: two detaches in flight would make the UID set difference
//!   ambiguous, so one instance completes before the next starts
//! - **Stop on first error**: a failing instance aborts the whole run and
//!   leaves completed steps in place for an operator to inspect
//! - **Stateless**: every value is queried fresh; nothing survives the run
//!
//! Two operators rotating the same group at once can still confuse join
//! detection. There is no lease or lock across runs.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::RotatorConfig;
use crate::discovery::discover_owned_groups;
use crate::error::{Result, RotatorError};
use crate::observer::NodeJoinObserver;
use crate::traits::{CloudInventory, ClusterInventory};
use crate::types::{ClusterNode, InstanceGroup};

/// Which instances a run should rotate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationTarget {
    /// Every instance of each named group, one batch per group
    Groups(Vec<String>),

    /// Every instance of every group owned by the cluster at `endpoint`, as one batch
    ClusterOwned {
        /// API server endpoint of the current cluster
        endpoint: String,
    },

    /// A single instance, by private DNS name
    Instance {
        /// Private DNS name (e.g. `ip-10-0-1-5.ec2.internal`)
        internal_name: String,
        /// Remove the node for good instead of replacing it
        remove_node: bool,
    },
}

impl RotationTarget {
    /// Named groups, or the cluster's own groups when `names` is empty
    pub fn from_group_names(names: Vec<String>, endpoint: impl Into<String>) -> Self {
        if names.is_empty() {
            Self::ClusterOwned {
                endpoint: endpoint.into(),
            }
        } else {
            Self::Groups(names)
        }
    }
}

/// Instances resolved from a target, ready for the rotation pipeline
#[derive(Debug, Clone)]
pub struct RotationBatch {
    /// Human-readable origin (group or cluster name)
    pub label: String,

    /// Instance/group pairs, in query order
    pub instance_groups: Vec<InstanceGroup>,

    /// Remove nodes instead of replacing them
    pub remove_node: bool,
}

/// Steps of a single instance rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationStep {
    /// Node found for the instance
    Resolved,
    /// Node marked unschedulable
    Cordoned,
    /// Node UIDs recorded
    SnapshotTaken,
    /// Instance left its group
    Detached,
    /// Replacement node joined and is Ready
    ReplacementReady,
    /// Workloads evicted
    Drained,
    /// Termination requested
    Terminated,
}

impl std::fmt::Display for RotationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Resolved => "resolved",
            Self::Cordoned => "cordoned",
            Self::SnapshotTaken => "snapshot-taken",
            Self::Detached => "detached",
            Self::ReplacementReady => "replacement-ready",
            Self::Drained => "drained",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Result of rotating one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationOutcome {
    /// Rotated instance
    pub instance_id: String,

    /// Group the instance was in
    pub group: String,

    /// Node that backed the instance
    pub node: String,

    /// Instance launch time
    pub launch_time: DateTime<Utc>,

    /// Replacement node, when one was awaited
    pub replacement_node: Option<String>,

    /// Last step reached
    pub final_step: RotationStep,

    /// Node was removed rather than replaced
    pub removed: bool,

    /// Nothing was changed
    pub dry_run: bool,

    /// Wall time spent on this instance (seconds)
    pub elapsed_secs: f64,
}

/// Result of a whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationReport {
    /// Run was a dry run
    pub dry_run: bool,

    /// One entry per rotated instance, in rotation order
    pub outcomes: Vec<RotationOutcome>,

    /// Total wall time (seconds)
    pub total_time_secs: f64,
}

/// Sort a batch oldest first and keep at most `limit` instances
pub fn order_batch(
    mut instance_groups: Vec<InstanceGroup>,
    limit: Option<usize>,
) -> Vec<InstanceGroup> {
    instance_groups.sort_by_key(|ig| ig.instance.launch_time);
    if let Some(limit) = limit {
        instance_groups.truncate(limit);
    }
    instance_groups
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        warn!("Cancellation requested; remaining instances are not attempted");
        return Err(RotatorError::Cancelled);
    }
    Ok(())
}

fn step_failed(step: RotationStep) -> impl FnOnce(RotatorError) -> RotatorError {
    move |e| {
        error!(step = %step, error = %e, "Rotation step failed; completed steps are left in place");
        e
    }
}

/// Rotates instances through the cloud and cluster adapters
pub struct Rotator {
    cloud: Arc<dyn CloudInventory>,
    cluster: Arc<dyn ClusterInventory>,
    observer: NodeJoinObserver,
    config: RotatorConfig,
}

impl Rotator {
    /// Create a rotator
    pub fn new(
        cloud: Arc<dyn CloudInventory>,
        cluster: Arc<dyn ClusterInventory>,
        config: RotatorConfig,
    ) -> Self {
        let observer = NodeJoinObserver::new(cluster.clone(), config.observer);
        Self {
            cloud,
            cluster,
            observer,
            config,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &RotatorConfig {
        &self.config
    }

    /// Resolve a target and rotate everything it names
    ///
    /// Stops at the first error or once `cancel` fires; later instances and
    /// batches are not attempted.
    pub async fn run(
        &self,
        target: RotationTarget,
        cancel: &CancellationToken,
    ) -> Result<RotationReport> {
        let start = Instant::now();
        let batches = self.resolve(target).await?;

        let mut report = RotationReport {
            dry_run: self.config.dry_run,
            ..Default::default()
        };
        for batch in batches {
            check_cancelled(cancel)?;
            let outcomes = self.rotate_batch(batch, cancel).await?;
            report.outcomes.extend(outcomes);
        }
        report.total_time_secs = start.elapsed().as_secs_f64();

        info!(
            rotated = report.outcomes.len(),
            total_time_secs = report.total_time_secs,
            dry_run = report.dry_run,
            "Rotation complete"
        );
        Ok(report)
    }

    /// Turn a target into batches of instance/group pairs
    pub async fn resolve(&self, target: RotationTarget) -> Result<Vec<RotationBatch>> {
        match target {
            RotationTarget::Groups(names) => {
                let mut batches = Vec::with_capacity(names.len());
                for name in names {
                    let group = self.cloud.describe_group(&name).await?;
                    let instances = self.cloud.list_instances_for_group(&group).await?;
                    batches.push(RotationBatch {
                        label: format!("ASG '{}'", group.name),
                        instance_groups: InstanceGroup::pair_all(instances, &group),
                        remove_node: false,
                    });
                }
                Ok(batches)
            }

            RotationTarget::ClusterOwned { endpoint } => {
                let (cluster, groups) =
                    discover_owned_groups(self.cloud.as_ref(), &endpoint).await?;
                let mut instance_groups = Vec::new();
                for group in &groups {
                    let instances = self.cloud.list_instances_for_group(group).await?;
                    instance_groups.extend(InstanceGroup::pair_all(instances, group));
                }
                Ok(vec![RotationBatch {
                    label: format!("cluster '{}'", cluster.name),
                    instance_groups,
                    remove_node: false,
                }])
            }

            RotationTarget::Instance {
                internal_name,
                remove_node,
            } => {
                let instance = self
                    .cloud
                    .find_instance_by_internal_name(&internal_name)
                    .await?;
                info!(
                    internal_name = %internal_name,
                    instance_id = %instance.id,
                    "Internal DNS '{}' is instance ID '{}'", internal_name, instance.id
                );
                let group = self.cloud.find_group_owning_instance(&instance.id).await?;
                Ok(vec![RotationBatch {
                    label: format!("instance '{}'", internal_name),
                    instance_groups: vec![InstanceGroup::new(instance, group)],
                    remove_node,
                }])
            }
        }
    }

    /// Rotate one resolved batch
    pub async fn rotate_batch(
        &self,
        batch: RotationBatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<RotationOutcome>> {
        info!(batch = %batch.label, "Rotating {}...", batch.label);
        if batch.remove_node {
            let mut outcomes = Vec::with_capacity(batch.instance_groups.len());
            for ig in &batch.instance_groups {
                outcomes.push(self.rotate_instance(ig, true, cancel).await?);
            }
            return Ok(outcomes);
        }
        self.rotate_instance_groups(batch.instance_groups, cancel)
            .await
    }

    /// Rotate a set of instances oldest first, honoring the configured limit
    pub async fn rotate_instance_groups(
        &self,
        instance_groups: Vec<InstanceGroup>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RotationOutcome>> {
        let total = instance_groups.len();
        let ordered = order_batch(instance_groups, self.config.batch_limit());
        if ordered.len() < total {
            info!(
                skipped = total - ordered.len(),
                limit = ordered.len(),
                "Limit reached; newer instances left for a later run"
            );
        }

        info!("Rotating {} nodes, oldest to newest.", ordered.len());
        let mut outcomes = Vec::with_capacity(ordered.len());
        for ig in &ordered {
            outcomes.push(self.rotate_instance(ig, false, cancel).await?);
        }
        Ok(outcomes)
    }

    /// Rotate one instance through the full state machine
    #[instrument(
        skip_all,
        fields(
            instance_id = %instance_group.instance_id(),
            group = %instance_group.group_id(),
            node = tracing::field::Empty,
        )
    )]
    pub async fn rotate_instance(
        &self,
        instance_group: &InstanceGroup,
        remove_node: bool,
        cancel: &CancellationToken,
    ) -> Result<RotationOutcome> {
        let start = Instant::now();
        let instance_id = instance_group.instance_id();
        let group = instance_group.group_id();
        check_cancelled(cancel)?;

        let node = self
            .cluster
            .find_node_by_instance_id(instance_id)
            .await
            .map_err(step_failed(RotationStep::Resolved))?;
        tracing::Span::current().record("node", node.name.as_str());
        info!(
            step = %RotationStep::Resolved,
            "Rotating node '{}' (instance '{}').", node.name, instance_id
        );

        let mut outcome = RotationOutcome {
            instance_id: instance_id.to_string(),
            group: group.to_string(),
            node: node.name.clone(),
            launch_time: instance_group.instance.launch_time,
            replacement_node: None,
            final_step: RotationStep::Resolved,
            removed: remove_node,
            dry_run: self.config.dry_run,
            elapsed_secs: 0.0,
        };

        if self.config.dry_run {
            info!("DRY RUN is enabled. Skipping rotate.");
            outcome.elapsed_secs = start.elapsed().as_secs_f64();
            return Ok(outcome);
        }

        outcome.replacement_node = self
            .replace(instance_group, &node, remove_node, cancel)
            .await?
            .map(|n| n.name);
        outcome.final_step = RotationStep::Terminated;
        outcome.elapsed_secs = start.elapsed().as_secs_f64();

        info!(
            elapsed_secs = outcome.elapsed_secs,
            replacement = ?outcome.replacement_node,
            "Instance rotated"
        );
        Ok(outcome)
    }

    /// Steps 2 to 7; returns the replacement node when one was awaited
    async fn replace(
        &self,
        instance_group: &InstanceGroup,
        node: &ClusterNode,
        remove_node: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<ClusterNode>> {
        let instance_id = instance_group.instance_id();
        let group = instance_group.group_id();

        info!(step = %RotationStep::Cordoned, "Cordoning node '{}'.", node.name);
        self.cluster
            .cordon(node)
            .await
            .map_err(step_failed(RotationStep::Cordoned))?;

        // Must precede detach, or an early replacement lands in the baseline
        let known = self
            .cluster
            .current_node_set()
            .await
            .map_err(step_failed(RotationStep::SnapshotTaken))?;
        info!(
            step = %RotationStep::SnapshotTaken,
            node_count = known.len(),
            "Captured cluster node set"
        );

        info!(
            step = %RotationStep::Detached,
            decrement_desired_capacity = remove_node,
            "Detaching instance '{}' from ASG '{}'...", instance_id, group
        );
        self.cloud
            .detach(group, instance_id, remove_node)
            .await
            .map_err(step_failed(RotationStep::Detached))?;

        let replacement = if remove_node {
            info!("Removing node without replacement");
            None
        } else {
            let ready = self
                .observer
                .await_replacement(known, cancel)
                .await
                .map_err(step_failed(RotationStep::ReplacementReady))?;
            info!(
                step = %RotationStep::ReplacementReady,
                replacement = %ready.name,
                "Replacement node is ready"
            );
            Some(ready)
        };

        info!(step = %RotationStep::Drained, "Draining node '{}'.", node.name);
        self.cluster
            .drain(node)
            .await
            .map_err(step_failed(RotationStep::Drained))?;

        info!(step = %RotationStep::Terminated, "Terminating instance '{}'...", instance_id);
        self.cloud
            .terminate(instance_id)
            .await
            .map_err(step_failed(RotationStep::Terminated))?;

        Ok(replacement)
    }
}
