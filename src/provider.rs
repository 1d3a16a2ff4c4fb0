//! Source trait for the frame watcher

use crate::Result;
use crate::snapshot::Snapshot;

/// Trait for snapshot sources
///
/// A source decides when something changed and handles its own waiting;
/// the [`Driver`](crate::driver::Driver) only forwards what it yields.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Wait for the next snapshot worth publishing
    ///
    /// Returns:
    /// - `Ok(Some(snapshot))` - New frame, or an `Empty` snapshot when the feeder left
    /// - `Ok(None)` - Source ended (normal termination)
    /// - `Err(e)` - Error occurred
    async fn next_snapshot(&mut self) -> Result<Option<Snapshot>>;
}
