//! Frame source backed by a shared region

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::Result;
use crate::config::WatcherSettings;
use crate::provider::FrameSource;
use crate::reader::Reader;
use crate::region::{SharedRegion, WaitResult};
use crate::snapshot::{Snapshot, SnapshotState};
use crate::types::ConsumerKind;

/// Metadata-only source polling one region
///
/// Checks the lock-free render cache key first and only waits on the
/// readiness event when nothing changed, so a frame published between two
/// waits is never missed.
pub struct RegionSource {
    reader: Reader,
    kind: ConsumerKind,
    wait_timeout: Duration,
    last_key: Option<u64>,
    attached: bool,
}

impl RegionSource {
    pub fn new(region: Arc<SharedRegion>, kind: ConsumerKind, settings: &WatcherSettings) -> Self {
        Self::with_reader(Reader::new(region), kind, settings)
    }

    pub fn with_reader(reader: Reader, kind: ConsumerKind, settings: &WatcherSettings) -> Self {
        Self { reader, kind, wait_timeout: settings.wait_timeout(), last_key: None, attached: false }
    }

    /// Snapshot to publish now, if any.
    fn poll(&mut self) -> Result<Option<Snapshot>> {
        if !self.reader.is_valid() {
            if self.attached {
                info!(region = self.reader.region().name(), "Feeder detached");
                self.attached = false;
                self.last_key = None;
                return Ok(Some(Snapshot::empty()));
            }
            return Ok(None);
        }

        let key = self.reader.render_cache_key(self.kind);
        if self.last_key == Some(key) {
            return Ok(None);
        }

        let snapshot = self.reader.maybe_get_uncached(self.kind)?;
        if snapshot.state() == SnapshotState::Empty {
            // Detached between the probe and the copy.
            return Ok(None);
        }
        if !self.attached {
            info!(
                region = self.reader.region().name(),
                session_id = %format!("{:#x}", snapshot.session_id()),
                "Feeder attached"
            );
            self.attached = true;
        }
        self.last_key = Some(if snapshot.has_metadata() { snapshot.render_cache_key() } else { key });
        Ok(Some(snapshot))
    }
}

#[async_trait::async_trait]
impl FrameSource for RegionSource {
    async fn next_snapshot(&mut self) -> Result<Option<Snapshot>> {
        loop {
            if let Some(snapshot) = self.poll()? {
                trace!(
                    frame_number = snapshot.frame_number_for_debugging(),
                    state = ?snapshot.state(),
                    "Region snapshot"
                );
                return Ok(Some(snapshot));
            }

            match self.reader.region().wait_for_frame_async(self.wait_timeout).await? {
                WaitResult::Signaled => {
                    trace!("Frame signaled, checking region");
                }
                WaitResult::Timeout => {
                    // Detach does not signal; the probe above catches it.
                    debug!(timeout_ms = self.wait_timeout.as_millis() as u64, "Wait timeout, polling again");
                }
            }
        }
    }
}
