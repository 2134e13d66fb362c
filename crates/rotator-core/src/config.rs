//! Rotation configuration

use std::time::Duration;

/// Default wait between polls for a replacement node to join
pub const DEFAULT_JOIN_POLL_INTERVAL_SECS: u64 = 30;

/// Default wait between polls for the replacement node to become ready
pub const DEFAULT_READY_POLL_INTERVAL_SECS: u64 = 10;

/// Polling cadence for the node-join observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverConfig {
    /// Interval between node listings while waiting for a join
    pub join_poll_interval: Duration,

    /// Interval between node fetches while waiting for readiness
    pub ready_poll_interval: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            join_poll_interval: Duration::from_secs(DEFAULT_JOIN_POLL_INTERVAL_SECS),
            ready_poll_interval: Duration::from_secs(DEFAULT_READY_POLL_INTERVAL_SECS),
        }
    }
}

impl ObserverConfig {
    /// Set the join poll interval
    pub fn with_join_poll_interval(mut self, interval: Duration) -> Self {
        self.join_poll_interval = interval;
        self
    }

    /// Set the readiness poll interval
    pub fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }
}

/// Configuration for a rotation run
#[derive(Debug, Clone, Default)]
pub struct RotatorConfig {
    /// Resolve nodes and log, but make no mutating call
    pub dry_run: bool,

    /// Rotate at most this many of the oldest instances per batch (0 = all)
    pub limit: usize,

    /// Observer polling cadence
    pub observer: ObserverConfig,
}

impl RotatorConfig {
    /// Enable or disable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the batch limit (0 = unbounded)
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the observer cadence
    pub fn with_observer(mut self, observer: ObserverConfig) -> Self {
        self.observer = observer;
        self
    }

    /// Batch limit as an option, `None` meaning unbounded
    pub fn batch_limit(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit)
    }
}
