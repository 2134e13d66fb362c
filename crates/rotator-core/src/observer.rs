//! Replacement node detection
//!
//! After an instance is detached without decrementing capacity, the
//! autoscaler launches a replacement. The cluster API gives no delivery
//! guarantee for "a node appeared", so we poll:
//!
//! ```text
//! NodeSet (before detach)
//!     │
//!     ├── 1. Await join:  list nodes every 30s until a UID not in the set shows up
//!     │
//!     └── 2. Await ready: fetch that node every 10s until Ready=True
//! ```
//!
//! Neither phase has an iteration bound. Both run in a background task that
//! races the run's [`CancellationToken`]; whichever finishes first wins and
//! the other side is dropped.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::ObserverConfig;
use crate::error::{Result, RotatorError};
use crate::traits::ClusterInventory;
use crate::types::{ClusterNode, NodeSet};

/// Polls the cluster for a replacement node
#[derive(Clone)]
pub struct NodeJoinObserver {
    cluster: Arc<dyn ClusterInventory>,
    config: ObserverConfig,
}

impl NodeJoinObserver {
    /// Create an observer over a cluster adapter
    pub fn new(cluster: Arc<dyn ClusterInventory>, config: ObserverConfig) -> Self {
        Self { cluster, config }
    }

    /// Polling configuration
    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Wait for a node whose UID is not in `known`
    pub async fn await_join(&self, known: &NodeSet) -> Result<ClusterNode> {
        let interval = self.config.join_poll_interval;
        loop {
            info!("Waiting {:?} for new node to join cluster...", interval);
            tokio::time::sleep(interval).await;

            let nodes = self.cluster.list_nodes().await?;
            if let Some(node) = known.first_unknown(&nodes) {
                info!(node = %node.name, uid = %node.uid, "Node joined cluster");
                return Ok(node.clone());
            }
            debug!(node_count = nodes.len(), "No new node yet");
        }
    }

    /// Wait for `node` to report `Ready=True`
    pub async fn await_ready(&self, node: &ClusterNode) -> Result<ClusterNode> {
        let interval = self.config.ready_poll_interval;
        loop {
            info!(node = %node.name, "Waiting {:?} for new node to be ready...", interval);
            tokio::time::sleep(interval).await;

            let current = self.cluster.get_node(&node.name).await?;
            if current.is_ready() {
                info!(node = %current.name, "Node is ready");
                return Ok(current);
            }
        }
    }

    /// Run both phases in the background until done or cancelled
    ///
    /// Returns [`RotatorError::Cancelled`] as soon as `cancel` fires.
    pub async fn await_replacement(
        &self,
        known: NodeSet,
        cancel: &CancellationToken,
    ) -> Result<ClusterNode> {
        let observer = self.clone();
        let mut task = tokio::spawn(
            async move {
                let joined = observer.await_join(&known).await?;
                observer.await_ready(&joined).await
            }
            .in_current_span(),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                task.abort();
                warn!("Cancelled while waiting for replacement node");
                Err(RotatorError::Cancelled)
            }
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) => Err(RotatorError::cluster_query("await replacement", e)),
            },
        }
    }
}
