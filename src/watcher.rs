//! Push-style, metadata-only consumption of a shared region.
//!
//! [`FrameWatcher`] runs a [`RegionSource`] on the Tokio runtime and fans
//! its snapshots out to any number of subscribers. It never copies textures;
//! callers that render use a [`CachedReader`](crate::CachedReader) and can use
//! the watcher to decide when to poll it.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use overlay_shm::{ConsumerKind, FrameWatcher, SharedRegion, ShmSettings, UpdateRate};
//!
//! # #[tokio::main]
//! # async fn main() -> overlay_shm::Result<()> {
//! let settings = ShmSettings::default();
//! let region = SharedRegion::open(&settings.region)?;
//! let watcher = FrameWatcher::start(region, ConsumerKind::Viewer, &settings.watcher)?;
//!
//! let mut snapshots = watcher.subscribe(UpdateRate::Max(30));
//! while let Some(snapshot) = snapshots.next().await {
//!     println!("{} overlays", snapshot.overlay_count());
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::WatcherSettings;
use crate::driver::Driver;
use crate::provider::FrameSource;
use crate::providers::RegionSource;
use crate::region::SharedRegion;
use crate::snapshot::Snapshot;
use crate::stream::ThrottleExt;
use crate::types::{ConsumerKind, UpdateRate};
use crate::{Result, ShmError};

/// Background watcher over one frame source.
///
/// Dropping the watcher stops the background task; open subscriptions end.
pub struct FrameWatcher {
    snapshots: watch::Receiver<Option<Snapshot>>,
    cancel: CancellationToken,
}

impl FrameWatcher {
    /// Watch `region` for frames targeting `kind`.
    ///
    /// Fails with [`ShmError::Watcher`] outside a Tokio runtime.
    pub fn start(region: Arc<SharedRegion>, kind: ConsumerKind, settings: &WatcherSettings) -> Result<Self> {
        info!(region = region.name(), ?kind, "Starting frame watcher");
        Self::from_source(RegionSource::new(region, kind, settings))
    }

    /// Watch an arbitrary source.
    pub fn from_source<S: FrameSource>(source: S) -> Result<Self> {
        tokio::runtime::Handle::try_current().map_err(|e| ShmError::Watcher {
            context: format!("frame watcher needs a Tokio runtime: {e}"),
        })?;
        let channels = Driver::spawn(source);
        Ok(Self { snapshots: channels.snapshots, cancel: channels.cancel })
    }

    /// Snapshots as they arrive.
    ///
    /// Yields the current snapshot first if there is one. The stream ends when
    /// the watcher is dropped or its source gives up.
    pub fn subscribe(&self, rate: UpdateRate) -> BoxStream<'static, Snapshot> {
        // Skip the initial `None` while waiting for the first snapshot; a later
        // `None` means the source ended.
        let snapshots = WatchStream::new(self.snapshots.clone())
            .skip_while(|opt| {
                let is_none = opt.is_none();
                async move { is_none }
            })
            .take_while(|opt| {
                let is_some = opt.is_some();
                async move { is_some }
            })
            .filter_map(|opt| async move { opt });

        match rate.throttle_interval() {
            None => snapshots.boxed(),
            Some(interval) => snapshots.throttle(interval).boxed(),
        }
    }

    /// Most recent snapshot, if any arrived yet.
    pub fn latest(&self) -> Option<Snapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the background task. Also happens on drop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FrameWatcher {
    fn drop(&mut self) {
        debug!("Dropping frame watcher");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotState;
    use crate::test_utils::{TestFeeder, sample_overlays};
    use crate::types::ShmConfig;
    use std::time::Duration;

    fn fast() -> WatcherSettings {
        WatcherSettings { wait_timeout_ms: 10 }
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let feeder = TestFeeder::new("watcher.noruntime", 1);
        let err = FrameWatcher::start(Arc::clone(feeder.region()), ConsumerKind::Viewer, &fast())
            .err()
            .unwrap();
        assert!(matches!(err, ShmError::Watcher { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscribers_see_frames_and_detach() {
        let feeder = TestFeeder::new("watcher.frames", 1);
        let watcher = FrameWatcher::start(Arc::clone(feeder.region()), ConsumerKind::Viewer, &fast()).unwrap();
        let mut snapshots = watcher.subscribe(UpdateRate::Native);

        feeder.publish(&ShmConfig::default(), &sample_overlays(2));
        let first = tokio::time::timeout(Duration::from_secs(5), snapshots.next()).await.unwrap().unwrap();
        assert_eq!(first.overlay_count(), 2);
        assert!(watcher.latest().is_some());

        feeder.detach();
        let detached = tokio::time::timeout(Duration::from_secs(5), snapshots.next()).await.unwrap().unwrap();
        assert_eq!(detached.state(), SnapshotState::Empty);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_the_watcher_ends_subscriptions() {
        let feeder = TestFeeder::new("watcher.drop", 1);
        let watcher = FrameWatcher::start(Arc::clone(feeder.region()), ConsumerKind::Viewer, &fast()).unwrap();
        let mut snapshots = watcher.subscribe(UpdateRate::Max(60));
        drop(watcher);

        let end = tokio::time::timeout(Duration::from_secs(5), snapshots.next()).await.unwrap();
        assert!(end.is_none());
    }
}
