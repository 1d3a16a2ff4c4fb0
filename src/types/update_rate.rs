//! Update rate control for frame watcher streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for frame watcher subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every frame the feeder publishes
    Native,

    /// Throttled to at most this many snapshots per second
    Max(u32),
}

impl UpdateRate {
    /// Normalize a zero rate to [`UpdateRate::Native`]; a feeder has no fixed
    /// frame rate to compare against.
    pub fn normalize(self) -> Self {
        match self {
            UpdateRate::Max(0) => UpdateRate::Native,
            other => other,
        }
    }

    /// Check if throttling is needed
    pub fn needs_throttle(self) -> bool {
        matches!(self.normalize(), UpdateRate::Max(_))
    }

    /// Get throttle interval if needed
    pub fn throttle_interval(self) -> Option<Duration> {
        match self.normalize() {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
