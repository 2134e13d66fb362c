//! Error types for node rotation

use thiserror::Error;

/// Rotation result type
pub type Result<T> = std::result::Result<T, RotatorError>;

/// Errors that can occur while rotating nodes
///
/// Every variant is fatal to the instance being rotated, and to the rest of
/// its batch. Nothing is retried or rolled back here.
#[derive(Error, Debug)]
pub enum RotatorError {
    /// A required group, instance, node or cluster does not exist
    #[error("{resource} '{name}' not found")]
    NotFound {
        /// Kind of resource
        resource: &'static str,
        /// Name or ID that was looked up
        name: String,
    },

    /// A lookup expecting exactly one result got none or several
    #[error("expected exactly 1 {resource} for '{name}', got {found}")]
    Ambiguous {
        /// Kind of resource
        resource: &'static str,
        /// Name or ID that was looked up
        name: String,
        /// Number of results returned
        found: usize,
    },

    /// Cloud API read failed (including paging failures)
    #[error("cloud query {operation} failed: {message}")]
    CloudQuery {
        /// API operation
        operation: &'static str,
        /// Provider error
        message: String,
    },

    /// Cloud API mutation was rejected
    #[error("cloud action {operation} failed: {message}")]
    CloudAction {
        /// API operation
        operation: &'static str,
        /// Provider error
        message: String,
    },

    /// Cluster API read failed
    #[error("cluster query {operation} failed: {message}")]
    ClusterQuery {
        /// API operation
        operation: &'static str,
        /// API server error
        message: String,
    },

    /// Cluster API mutation was rejected
    #[error("cluster action {operation} failed: {message}")]
    ClusterAction {
        /// API operation
        operation: &'static str,
        /// API server error
        message: String,
    },

    /// Drain timed out or a workload could not be evicted
    #[error("drain of node '{node}' failed: {message}")]
    Drain {
        /// Node being drained
        node: String,
        /// Failure detail
        message: String,
    },

    /// The run was cancelled while waiting on the cluster
    #[error("rotation cancelled")]
    Cancelled,

    /// Cluster discovery found no group tagged as owned
    #[error("no ASGs found for cluster '{cluster}'")]
    NoOwnedGroups {
        /// Cluster name
        cluster: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl RotatorError {
    /// Create a not-found error
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    /// Create a cloud query error from any provider error
    pub fn cloud_query<E: std::fmt::Display>(operation: &'static str, err: E) -> Self {
        Self::CloudQuery {
            operation,
            message: err.to_string(),
        }
    }

    /// Create a cloud action error from any provider error
    pub fn cloud_action<E: std::fmt::Display>(operation: &'static str, err: E) -> Self {
        Self::CloudAction {
            operation,
            message: err.to_string(),
        }
    }

    /// Create a cluster query error
    pub fn cluster_query<E: std::fmt::Display>(operation: &'static str, err: E) -> Self {
        Self::ClusterQuery {
            operation,
            message: err.to_string(),
        }
    }

    /// Create a cluster action error
    pub fn cluster_action<E: std::fmt::Display>(operation: &'static str, err: E) -> Self {
        Self::ClusterAction {
            operation,
            message: err.to_string(),
        }
    }

    /// Create a drain error
    pub fn drain(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Drain {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for [`RotatorError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Ambiguous { found: 0, .. })
    }

    /// True for [`RotatorError::Cancelled`]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Require exactly one item
///
/// Zero and many share one "expected exactly 1" error; zero still counts as
/// not-found.
pub fn exactly_one<T>(
    mut items: Vec<T>,
    resource: &'static str,
    name: &str,
) -> Result<T> {
    match items.len() {
        1 => Ok(items.remove(0)),
        found => Err(RotatorError::Ambiguous {
            resource,
            name: name.to_string(),
            found,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one() {
        assert_eq!(exactly_one(vec![7], "ASG", "asg-1").unwrap(), 7);

        let err = exactly_one(Vec::<u8>::new(), "ASG", "asg-1").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, RotatorError::Ambiguous { found: 0, .. }));
        assert_eq!(err.to_string(), "expected exactly 1 ASG for 'asg-1', got 0");

        let err = exactly_one(vec![1, 2], "ASG", "asg-1").unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, RotatorError::Ambiguous { found: 2, .. }));
        assert_eq!(err.to_string(), "expected exactly 1 ASG for 'asg-1', got 2");
    }

    #[test]
    fn test_no_owned_groups_message() {
        let err = RotatorError::NoOwnedGroups {
            cluster: "prod".to_string(),
        };
        assert_eq!(err.to_string(), "no ASGs found for cluster 'prod'");
    }

    #[test]
    fn test_helpers() {
        let err = RotatorError::cloud_action("DetachInstances", "throttled");
        assert_eq!(
            err.to_string(),
            "cloud action DetachInstances failed: throttled"
        );
        assert!(RotatorError::Cancelled.is_cancelled());
        assert!(!RotatorError::config("bad").is_cancelled());
    }
}
