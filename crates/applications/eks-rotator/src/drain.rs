//! Node draining via the eviction API
//!
//! Before an old instance is terminated its workloads must move elsewhere.
//! The node is already cordoned, so evicted pods land on other nodes:
//!
//! 1. List every pod bound to the node
//! 2. Skip DaemonSet pods and static (mirror) pods; they cannot move
//! 3. Evict the rest with a zero grace period, retrying while a disruption
//!    budget blocks the eviction (HTTP 429)
//! 4. Wait until every evicted pod is gone
//!
//! The whole sequence is bounded by one timeout (600s by default). Pods
//! without a controlling owner are evicted too and will not come back.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, EvictParams, ListParams};
use kube::Client;
use rotator_core::{Result, RotatorError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default drain timeout
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 600;

/// Annotation carried by static pods mirrored from a kubelet manifest
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

const EVICTION_RETRY_INTERVAL_MS: u64 = 5_000;
const DELETION_POLL_INTERVAL_MS: u64 = 2_000;

/// Drain timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    /// Upper bound on the whole drain
    pub timeout: Duration,

    /// Grace period handed to evicted pods
    pub grace_period: Duration,

    /// Wait before retrying an eviction blocked by a disruption budget
    pub eviction_retry_interval: Duration,

    /// Wait between checks that evicted pods are gone
    pub deletion_poll_interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            grace_period: Duration::ZERO,
            eviction_retry_interval: Duration::from_millis(EVICTION_RETRY_INTERVAL_MS),
            deletion_poll_interval: Duration::from_millis(DELETION_POLL_INTERVAL_MS),
        }
    }
}

impl DrainConfig {
    /// Set the overall timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the pod grace period
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Grace period in whole seconds, saturating at `u32::MAX`
    pub fn grace_period_seconds(&self) -> u32 {
        u32::try_from(self.grace_period.as_secs()).unwrap_or(u32::MAX)
    }
}

/// Result of a completed drain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainResult {
    /// Node that was drained
    pub node: String,
    /// Pods evicted
    pub evicted: usize,
    /// Pods left in place (DaemonSet, mirror, finished)
    pub skipped: usize,
    /// Time spent draining (seconds)
    pub drain_time_secs: f64,
}

/// Why a pod stays on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Managed by a DaemonSet
    DaemonSet,
    /// Static pod mirrored by the kubelet
    Mirror,
    /// Already succeeded or failed
    Finished,
}

/// Decide whether a pod should be left alone
pub fn skip_reason(pod: &Pod) -> Option<SkipReason> {
    let meta = &pod.metadata;
    if meta
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION))
    {
        return Some(SkipReason::Mirror);
    }
    if meta
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.kind == "DaemonSet")
    {
        return Some(SkipReason::DaemonSet);
    }
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if matches!(phase, Some("Succeeded") | Some("Failed")) {
        return Some(SkipReason::Finished);
    }
    None
}

/// A pod scheduled for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
struct EvictionTarget {
    namespace: String,
    name: String,
    uid: Option<String>,
}

/// Evicts workloads from a node
#[derive(Clone)]
pub struct NodeDrainer {
    client: Client,
    config: DrainConfig,
}

impl NodeDrainer {
    /// Create a drainer
    pub fn new(client: Client, config: DrainConfig) -> Self {
        Self { client, config }
    }

    /// Drain timing in use
    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Evict every movable pod from `node` and wait until they are gone
    pub async fn drain(&self, node: &str) -> Result<DrainResult> {
        let start = Instant::now();
        info!(
            node = %node,
            timeout_secs = self.config.timeout.as_secs(),
            "Draining node"
        );

        let (evicted, skipped) = tokio::time::timeout(self.config.timeout, self.evict_all(node))
            .await
            .map_err(|_| {
                RotatorError::drain(
                    node,
                    format!("timed out after {}s", self.config.timeout.as_secs()),
                )
            })??;

        let result = DrainResult {
            node: node.to_string(),
            evicted,
            skipped,
            drain_time_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            node = %node,
            evicted = result.evicted,
            skipped = result.skipped,
            drain_time_secs = result.drain_time_secs,
            "Drain completed"
        );
        Ok(result)
    }

    async fn evict_all(&self, node: &str) -> Result<(usize, usize)> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        let list = pods
            .list(&params)
            .await
            .map_err(|e| RotatorError::drain(node, format!("failed to list pods: {e}")))?;

        let mut targets = Vec::new();
        let mut skipped = 0;
        for pod in &list.items {
            let name = pod.metadata.name.clone().unwrap_or_default();
            if let Some(reason) = skip_reason(pod) {
                debug!(pod = %name, reason = ?reason, "Skipping pod");
                skipped += 1;
                continue;
            }
            targets.push(EvictionTarget {
                namespace: pod.metadata.namespace.clone().unwrap_or_else(|| "default".to_string()),
                name,
                uid: pod.metadata.uid.clone(),
            });
        }

        for target in &targets {
            self.evict(node, target).await?;
        }
        for target in &targets {
            self.wait_for_deletion(node, target).await?;
        }
        Ok((targets.len(), skipped))
    }

    async fn evict(&self, node: &str, target: &EvictionTarget) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: Some(self.config.grace_period_seconds()),
                ..DeleteParams::default()
            }),
            ..EvictParams::default()
        };

        loop {
            match pods.evict(&target.name, &params).await {
                Ok(_) => {
                    debug!(namespace = %target.namespace, pod = %target.name, "Evicted pod");
                    return Ok(());
                }
                Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
                Err(kube::Error::Api(e)) if e.code == 429 => {
                    warn!(
                        namespace = %target.namespace,
                        pod = %target.name,
                        "Eviction blocked by disruption budget, retrying"
                    );
                    tokio::time::sleep(self.config.eviction_retry_interval).await;
                }
                Err(e) => {
                    return Err(RotatorError::drain(
                        node,
                        format!("failed to evict {}/{}: {e}", target.namespace, target.name),
                    ));
                }
            }
        }
    }

    async fn wait_for_deletion(&self, node: &str, target: &EvictionTarget) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        loop {
            let current = pods.get_opt(&target.name).await.map_err(|e| {
                RotatorError::drain(
                    node,
                    format!("failed to check {}/{}: {e}", target.namespace, target.name),
                )
            })?;
            if !is_same_pod(current.as_ref(), target) {
                return Ok(());
            }
            tokio::time::sleep(self.config.deletion_poll_interval).await;
        }
    }
}

/// A recreated pod with the same name has a new UID
fn is_same_pod(current: Option<&Pod>, target: &EvictionTarget) -> bool {
    match current {
        None => false,
        Some(pod) => pod.metadata.uid == target.uid,
    }
}
