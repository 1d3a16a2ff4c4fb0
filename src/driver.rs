//! Driver spawns and manages the snapshot polling task

use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::provider::FrameSource;
use crate::snapshot::Snapshot;

/// Consecutive source errors tolerated before the driver gives up.
const MAX_ERRORS: u32 = 10;

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Latest snapshot; `None` before the first one and after the source ended
    pub snapshots: watch::Receiver<Option<Snapshot>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns and manages the snapshot polling task
///
/// The task owns the [`FrameSource`] and forwards everything it yields into
/// a watch channel, so slow subscribers only ever see the latest snapshot.
pub struct Driver;

impl Driver {
    /// Spawn the polling task for the given source
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(source: S) -> DriverChannels
    where
        S: FrameSource,
    {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        tokio::spawn(async move {
            Self::snapshot_task(source, snapshot_tx, cancel_task).await;
        });

        DriverChannels { snapshots: snapshot_rx, cancel }
    }

    async fn snapshot_task<S>(
        mut source: S,
        snapshot_tx: watch::Sender<Option<Snapshot>>,
        cancel: CancellationToken,
    ) where
        S: FrameSource,
    {
        info!("Snapshot task started");
        let mut snapshot_count = 0u64;
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Snapshot task cancelled");
                    break;
                }
                result = source.next_snapshot() => result,
            };

            match result {
                Ok(Some(snapshot)) => {
                    snapshot_count += 1;
                    error_count = 0;
                    trace!(
                        snapshot_count,
                        frame_number = snapshot.frame_number_for_debugging(),
                        state = ?snapshot.state(),
                        "Publishing snapshot"
                    );

                    if snapshot_tx.send(Some(snapshot)).is_err() {
                        debug!("Snapshot receivers dropped, shutting down");
                        break;
                    }
                }
                Ok(None) => {
                    info!(snapshot_count, "Frame source ended");
                    let _ = snapshot_tx.send(None);
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    error!(error_count, max_errors = MAX_ERRORS, error = %e, "Frame source error");

                    if error_count >= MAX_ERRORS {
                        error!("Too many frame source errors, shutting down");
                        let _ = snapshot_tx.send(None);
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, ... capped at 1.6s
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(snapshot_count, "Snapshot task ended");
    }
}
