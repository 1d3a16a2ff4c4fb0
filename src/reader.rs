//! Consumer side of the frame exchange, without caching.
//!
//! [`Reader`] copies the shared record under the region lock and builds a
//! [`Snapshot`] from the copy after the lock is released; handle duplication
//! and the texture copy never run while the feeder is blocked.
//!
//! Duplicated handles are kept per swapchain slot for the lifetime of a
//! feeder session. When the session id in the record changes, every
//! duplicated handle and the feeder process handle are dropped before anything
//! is duplicated from the new session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

use crate::Result;
use crate::ipc::{HandleDuplicator, IpcHandles, OwnedHandle, default_duplicator};
use crate::metadata::{FrameMetadata, SWAPCHAIN_LENGTH};
use crate::region::SharedRegion;
use crate::snapshot::Snapshot;
use crate::texture::{ClientTexture, TextureCopier};
use crate::types::ConsumerKind;

/// Handles owned on behalf of one feeder session.
#[derive(Default)]
struct ReaderSession {
    session_id: Option<u64>,
    feeder_process: Option<OwnedHandle>,
    handles: [Option<IpcHandles>; SWAPCHAIN_LENGTH],
}

impl ReaderSession {
    /// Forget everything from a previous session. Returns true on change.
    fn update(&mut self, session_id: u64) -> bool {
        if self.session_id == Some(session_id) {
            return false;
        }
        if let Some(previous) = self.session_id {
            debug!(
                previous = %format!("{previous:#x}"),
                current = %format!("{session_id:#x}"),
                "Feeder session changed, dropping duplicated handles"
            );
        }
        self.handles = Default::default();
        self.feeder_process = None;
        self.session_id = Some(session_id);
        true
    }
}

struct ReaderImpl {
    region: Arc<SharedRegion>,
    duplicator: Arc<dyn HandleDuplicator>,
    session: Mutex<ReaderSession>,
}

/// Lock-scoped reader of the shared record. Clones share handles and session.
#[derive(Clone)]
pub struct Reader {
    inner: Arc<ReaderImpl>,
}

impl Reader {
    /// Reader duplicating handles with the platform's duplicator.
    pub fn new(region: Arc<SharedRegion>) -> Self {
        Self::with_duplicator(region, default_duplicator())
    }

    pub fn with_duplicator(region: Arc<SharedRegion>, duplicator: Arc<dyn HandleDuplicator>) -> Self {
        debug!(region = region.name(), "Reader attached");
        Self {
            inner: Arc::new(ReaderImpl {
                region,
                duplicator,
                session: Mutex::new(ReaderSession::default()),
            }),
        }
    }

    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.inner.region
    }

    /// Region mapped and a feeder attached.
    pub fn is_valid(&self) -> bool {
        self.inner.region.is_valid() && self.inner.region.has_feeder()
    }

    /// Session id currently in the record (lock-free).
    pub fn session_id(&self) -> u64 {
        self.inner.region.session_id()
    }

    /// Frame number currently in the record (lock-free). Not a cache key.
    pub fn frame_count_for_metrics(&self) -> u64 {
        self.inner.region.frame_number()
    }

    /// Key identifying the current frame; identical for every consumer kind.
    pub fn render_cache_key(&self, _kind: ConsumerKind) -> u64 {
        self.inner.region.render_cache_key()
    }

    /// Drop duplicated handles if the feeder session changed since the last
    /// call. Returns true when it did.
    pub fn update_session(&self) -> bool {
        let session_id = self.inner.region.session_id();
        self.session().update(session_id)
    }

    /// Metadata-only snapshot of the current frame.
    pub fn maybe_get_uncached(&self, kind: ConsumerKind) -> Result<Snapshot> {
        let metadata = self.copy_metadata()?;
        Ok(self.metadata_snapshot(metadata, kind))
    }

    /// Snapshot of the current frame with its texture copied into `dest`.
    ///
    /// Duplication and copy failures are returned, not retried.
    pub fn maybe_get_uncached_with_texture(
        &self,
        gpu_adapter_id: u64,
        copier: &dyn TextureCopier,
        dest: &Arc<dyn ClientTexture>,
        kind: ConsumerKind,
    ) -> Result<Snapshot> {
        let metadata = self.copy_metadata()?;
        self.texture_snapshot(metadata, gpu_adapter_id, copier, dest, kind)
    }

    /// Copy the record under the region lock.
    pub(crate) fn copy_metadata(&self) -> Result<FrameMetadata> {
        let guard = self.inner.region.lock()?;
        let metadata = guard.read();
        guard.unlock();
        Ok(metadata)
    }

    pub(crate) fn metadata_snapshot(&self, metadata: FrameMetadata, kind: ConsumerKind) -> Snapshot {
        if !metadata.is_valid() {
            return Snapshot::empty();
        }
        if !metadata.config.target.matches(kind) {
            trace!(?kind, target = metadata.config.target.0, "Frame not meant for this consumer");
            return Snapshot::incorrect_kind();
        }
        Snapshot::from_metadata(metadata)
    }

    pub(crate) fn texture_snapshot(
        &self,
        metadata: FrameMetadata,
        gpu_adapter_id: u64,
        copier: &dyn TextureCopier,
        dest: &Arc<dyn ClientTexture>,
        kind: ConsumerKind,
    ) -> Result<Snapshot> {
        if !metadata.is_valid() {
            return Ok(Snapshot::empty());
        }
        if !metadata.config.target.matches(kind) {
            trace!(?kind, target = metadata.config.target.0, "Frame not meant for this consumer");
            return Ok(Snapshot::incorrect_kind());
        }

        let mut session = self.session();
        session.update(metadata.session_id);

        if metadata.gpu_adapter_id != gpu_adapter_id {
            debug!(
                feeder = %format!("{:#x}", metadata.gpu_adapter_id),
                consumer = %format!("{gpu_adapter_id:#x}"),
                "Frame rendered on another GPU adapter"
            );
            return Ok(Snapshot::incorrect_gpu());
        }
        if metadata.overlay_count() == 0 {
            return Ok(Snapshot::from_metadata(metadata));
        }

        let slot = metadata.swapchain_index();
        let stale = session.handles[slot]
            .as_ref()
            .is_some_and(|handles| !handles.matches(metadata.texture, metadata.fence));
        if stale {
            warn!(slot, "Feeder handles changed without a new session, replacing them");
            session.handles[slot] = None;
        }

        if session.handles[slot].is_none() {
            if session.feeder_process.is_none() {
                session.feeder_process = Some(OwnedHandle::open_process(
                    &self.inner.duplicator,
                    metadata.feeder_process_id,
                )?);
            }
            let ReaderSession { feeder_process, handles, .. } = &mut *session;
            if let Some(process) = feeder_process.as_ref() {
                handles[slot] = Some(IpcHandles::duplicate(
                    &self.inner.duplicator,
                    process,
                    metadata.feeder_process_id,
                    metadata.texture,
                    metadata.fence,
                )?);
            }
        }

        let Some(handles) = session.handles[slot].as_ref() else {
            return Ok(Snapshot::from_metadata(metadata));
        };
        copier.copy(handles.texture(), dest.as_ref(), handles.fence(), metadata.frame_ready_fence_value())?;
        trace!(
            frame_number = metadata.frame_number,
            slot,
            dest_slot = dest.swapchain_index(),
            "Copied frame texture"
        );
        Ok(Snapshot::with_texture(metadata, Arc::clone(dest)))
    }

    fn session(&self) -> MutexGuard<'_, ReaderSession> {
        self.inner.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader").field("region", &self.inner.region.name()).finish_non_exhaustive()
    }
}
