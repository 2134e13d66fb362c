//! # EKS Node Rotator
//!
//! Safe replacement of the EC2 instances behind EKS worker node groups.
//!
//! ## Architecture
//!
//! ```text
//! eks-rotator (binary)
//! ├── aws      AwsInventory   ──► Auto Scaling, EC2, EKS
//! ├── cluster  KubeInventory  ──► Kubernetes API (nodes)
//! │   └── drain NodeDrainer   ──► Kubernetes API (pods, eviction)
//! └── rotator_core::Rotator   (engine, observer, discovery)
//! ```
//!
//! The binary wires both adapters into [`rotator_core::Rotator`]. Every
//! rotation detaches the old instance first so the autoscaler launches its
//! replacement, waits for that replacement to join and report Ready, and only
//! then drains and terminates the old instance.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aws;
pub mod cluster;
pub mod drain;

pub use aws::{load_sdk_config, AwsInventory};
pub use cluster::KubeInventory;
pub use drain::{DrainConfig, NodeDrainer};
