//! Rotator Core - Node rotation engine and adapter traits
//!
//! This crate holds everything that does not talk to a real API:
//! - CloudInventory / ClusterInventory traits (adapters live in eks-rotator)
//! - Instance, group and node types
//! - Cluster discovery by ownership tag
//! - Node-join observer
//! - The rotation state machine
//!
//! ## Rotation
//!
//! ```text
//! target ──► resolve ──► batches ──► oldest first, limit ──► per instance:
//!                                                              cordon
//!                                                              snapshot
//!                                                              detach
//!                                                              await join + ready
//!                                                              drain
//!                                                              terminate
//! ```
//!
//! See [`rotator`] for the state machine and [`observer`] for join detection.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod observer;
pub mod rotator;
pub mod traits;
pub mod types;

#[cfg(test)]
#[allow(missing_docs)]
pub(crate) mod testing;

pub use config::{ObserverConfig, RotatorConfig};
pub use discovery::{discover_owned_groups, normalize_endpoint, resolve_cluster};
pub use error::{Result, RotatorError};
pub use observer::NodeJoinObserver;
pub use rotator::{
    order_batch, RotationBatch, RotationOutcome, RotationReport, RotationStep, RotationTarget,
    Rotator,
};
pub use traits::{CloudInventory, ClusterInventory};
pub use types::*;
