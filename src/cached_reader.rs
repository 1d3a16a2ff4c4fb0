//! Per-consumer caching on top of [`Reader`].
//!
//! A compositor typically polls once per display frame, which is faster than
//! most feeders publish. [`CachedReader::maybe_get`] returns the previous
//! snapshot without taking the region lock while the render cache key is
//! unchanged, and otherwise copies the new frame into the next texture of a
//! small ring so earlier snapshots stay intact while the GPU still reads them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::Result;
use crate::config::CacheSettings;
use crate::reader::Reader;
use crate::snapshot::{Snapshot, SnapshotState};
use crate::texture::{ClientTexture, ClientTextureFactory, TextureCopier};
use crate::types::{ConsumerKind, PixelSize};

/// Caching consumer for one consumer kind on one GPU adapter.
pub struct CachedReader {
    reader: Reader,
    copier: Arc<dyn TextureCopier>,
    factory: Arc<dyn ClientTextureFactory>,
    kind: ConsumerKind,
    stale_window: Duration,

    gpu_adapter_id: u64,
    swapchain_length: u8,
    swapchain_index: u8,
    client_textures: Vec<Option<Arc<dyn ClientTexture>>>,

    cache: VecDeque<Snapshot>,
    cache_key: Option<u64>,
    updated_at: Option<Instant>,
    session_id: Option<u64>,
}

impl CachedReader {
    pub fn new(
        reader: Reader,
        copier: Arc<dyn TextureCopier>,
        factory: Arc<dyn ClientTextureFactory>,
        kind: ConsumerKind,
    ) -> Self {
        Self {
            reader,
            copier,
            factory,
            kind,
            stale_window: CacheSettings::default().stale_window(),
            gpu_adapter_id: 0,
            swapchain_length: 0,
            swapchain_index: 0,
            client_textures: Vec::new(),
            cache: VecDeque::new(),
            cache_key: None,
            updated_at: None,
            session_id: None,
        }
    }

    pub fn with_settings(mut self, settings: &CacheSettings) -> Self {
        self.stale_window = settings.stale_window();
        self
    }

    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub fn kind(&self) -> ConsumerKind {
        self.kind
    }

    /// Size the texture ring and bind to a GPU adapter. Drops cached
    /// snapshots and client textures.
    pub fn initialize_cache(&mut self, gpu_adapter_id: u64, swapchain_length: u8) {
        debug!(
            kind = ?self.kind,
            gpu_adapter_id = %format!("{gpu_adapter_id:#x}"),
            swapchain_length,
            "Initializing snapshot cache"
        );
        self.gpu_adapter_id = gpu_adapter_id;
        self.swapchain_length = swapchain_length;
        self.swapchain_index = 0;
        self.client_textures = vec![None; swapchain_length as usize];
        self.clear_cache();
    }

    /// Latest frame with its texture copied into the ring.
    ///
    /// # Panics
    ///
    /// If [`initialize_cache`](Self::initialize_cache) has not been called
    /// with a non-zero swapchain length.
    pub fn maybe_get(&mut self) -> Result<Snapshot> {
        assert!(
            self.swapchain_index < self.swapchain_length,
            "CachedReader::maybe_get called before initialize_cache"
        );
        if !self.reader.is_valid() {
            self.clear_cache();
            return Ok(Snapshot::empty());
        }
        self.update_session();

        let key = self.reader.render_cache_key(self.kind);
        if self.cache_key == Some(key) {
            if let Some(front) = self.cache.front().filter(|s| s.state() == SnapshotState::ValidWithTexture) {
                trace!(key, "Snapshot cache hit");
                return Ok(front.clone());
            }
        }

        let slot = self.swapchain_index;
        self.swapchain_index = (slot + 1) % self.swapchain_length;

        let metadata = self.reader.copy_metadata()?;
        if metadata.overlay_count() == 0 {
            return Ok(self.reader.metadata_snapshot(metadata, self.kind));
        }

        let key = metadata.render_cache_key();
        let dest = self.client_texture(slot, metadata.config.texture_size)?;
        let snapshot = self.reader.texture_snapshot(
            metadata,
            self.gpu_adapter_id,
            self.copier.as_ref(),
            &dest,
            self.kind,
        )?;

        let now = Instant::now();
        if snapshot.state() == SnapshotState::Empty {
            return Ok(self.fallback(now));
        }

        trace!(key, slot, state = ?snapshot.state(), "Snapshot cache refreshed");
        self.updated_at = Some(now);
        self.cache.push_front(snapshot.clone());
        self.cache.truncate(self.ring_length());
        self.cache_key = Some(key);
        Ok(snapshot)
    }

    /// Latest frame without a texture. Never creates or copies into ring
    /// textures.
    pub fn maybe_get_metadata(&mut self) -> Result<Snapshot> {
        if !self.reader.is_valid() {
            self.clear_cache();
            return Ok(Snapshot::empty());
        }
        self.update_session();

        let key = self.reader.render_cache_key(self.kind);
        if self.cache_key == Some(key) {
            if let Some(front) = self.cache.front() {
                return Ok(front.clone());
            }
        }

        let metadata = self.reader.copy_metadata()?;
        let key = metadata.render_cache_key();
        let snapshot = self.reader.metadata_snapshot(metadata, self.kind);
        if snapshot.has_metadata() {
            self.cache.push_front(snapshot.clone());
            self.cache.truncate(self.ring_length());
            self.cache_key = Some(key);
        }
        Ok(snapshot)
    }

    /// Previous snapshot if the cache was refreshed recently, else `Empty`.
    fn fallback(&self, now: Instant) -> Snapshot {
        let fresh = self
            .updated_at
            .is_some_and(|updated_at| now.saturating_duration_since(updated_at) <= self.stale_window);
        match self.cache.front() {
            Some(front) if fresh => front.clone(),
            _ => Snapshot::empty(),
        }
    }

    fn update_session(&mut self) {
        let session_id = self.reader.session_id();
        if self.session_id == Some(session_id) {
            return;
        }
        if let Some(previous) = self.session_id {
            debug!(
                kind = ?self.kind,
                previous = %format!("{previous:#x}"),
                current = %format!("{session_id:#x}"),
                "Feeder session changed, invalidating snapshot cache"
            );
        }
        self.factory.release_ipc_handles();
        self.reader.update_session();
        self.clear_cache();
        self.session_id = Some(session_id);
    }

    /// Ring texture for `slot`, recreated when the feeder's texture size changed.
    fn client_texture(&mut self, slot: u8, size: PixelSize) -> Result<Arc<dyn ClientTexture>> {
        let entry = &mut self.client_textures[slot as usize];
        if let Some(texture) = entry.as_ref().filter(|t| t.dimensions() == size) {
            return Ok(Arc::clone(texture));
        }
        debug!(slot, width = size.width, height = size.height, "Creating client texture");
        let texture = self.factory.create_client_texture(size, slot)?;
        *entry = Some(Arc::clone(&texture));
        Ok(texture)
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
        self.cache_key = None;
        self.updated_at = None;
    }

    fn ring_length(&self) -> usize {
        (self.swapchain_length as usize).max(1)
    }
}

impl std::fmt::Debug for CachedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedReader")
            .field("kind", &self.kind)
            .field("swapchain_length", &self.swapchain_length)
            .field("cached", &self.cache.len())
            .field("cache_key", &self.cache_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        CountingDuplicator, MockTexture, MockTextureFactory, RecordingCopier, TestFeeder,
        sample_overlays,
    };
    use crate::types::ShmConfig;

    const GPU: u64 = 0xADA9;

    struct Harness {
        feeder: TestFeeder,
        copier: Arc<RecordingCopier>,
        factory: Arc<MockTextureFactory>,
        duplicator: Arc<CountingDuplicator>,
        cached: CachedReader,
    }

    fn harness(name: &str) -> Harness {
        let feeder = TestFeeder::new(name, GPU);
        let copier = Arc::new(RecordingCopier::default());
        let factory = Arc::new(MockTextureFactory::default());
        let duplicator = Arc::new(CountingDuplicator::default());
        let mut cached = CachedReader::new(
            feeder.reader_with(duplicator.clone()),
            copier.clone(),
            factory.clone(),
            ConsumerKind::OpenXr,
        );
        cached.initialize_cache(GPU, 3);
        Harness { feeder, copier, factory, duplicator, cached }
    }

    fn sized(width: u32, height: u32) -> ShmConfig {
        ShmConfig { texture_size: PixelSize::new(width, height), ..Default::default() }
    }

    #[test]
    fn unchanged_key_returns_same_snapshot_without_locking() {
        let mut h = harness("cached.hit");
        h.feeder.publish(&sized(128, 64), &sample_overlays(2));

        let first = h.cached.maybe_get().unwrap();
        assert_eq!(first.state(), SnapshotState::ValidWithTexture);
        let locks = h.feeder.region().stats().acquisitions();

        for _ in 0..5 {
            let again = h.cached.maybe_get().unwrap();
            assert!(again.ptr_eq(&first));
        }
        assert_eq!(h.feeder.region().stats().acquisitions(), locks);
        assert_eq!(h.copier.copies().len(), 1);
    }

    #[test]
    fn new_frames_rotate_through_the_ring() {
        let mut h = harness("cached.ring");
        let mut snapshots = Vec::new();
        for _ in 0..4 {
            h.feeder.publish(&sized(32, 32), &sample_overlays(1));
            snapshots.push(h.cached.maybe_get().unwrap());
        }

        let slots: Vec<u8> = snapshots.iter().map(|s| s.texture::<MockTexture>().swapchain_index()).collect();
        assert_eq!(slots, vec![0, 1, 2, 0]);
        assert_eq!(h.factory.created().len(), 3);
        // The fourth frame reuses slot 0's texture.
        assert_eq!(
            snapshots[0].texture::<MockTexture>().id(),
            snapshots[3].texture::<MockTexture>().id()
        );
        let keys: Vec<u64> = snapshots.iter().map(Snapshot::render_cache_key).collect();
        assert!(keys.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn session_change_invalidates_everything() {
        let mut h = harness("cached.session");
        h.feeder.publish(&sized(32, 32), &sample_overlays(1));
        let before = h.cached.maybe_get().unwrap();
        assert_eq!(h.factory.released(), 1);

        h.feeder.restart();
        h.feeder.publish(&sized(32, 32), &sample_overlays(1));
        let after = h.cached.maybe_get().unwrap();

        assert!(!after.ptr_eq(&before));
        assert_eq!(after.session_id(), h.feeder.session_id());
        assert_eq!(h.factory.released(), 2);
        assert_eq!(h.duplicator.opened(), 2);
        // Process handle plus texture and fence from the first session.
        assert_eq!(h.duplicator.closed(), 3);
    }

    #[test]
    fn zero_overlays_are_not_cached() {
        let mut h = harness("cached.empty");
        h.feeder.publish(&sized(32, 32), &[]);

        let first = h.cached.maybe_get().unwrap();
        let second = h.cached.maybe_get().unwrap();
        assert_eq!(first.state(), SnapshotState::ValidWithoutTexture);
        assert!(!first.ptr_eq(&second));
        assert!(h.factory.created().is_empty());
        assert!(h.copier.copies().is_empty());
    }

    #[test]
    fn size_change_recreates_the_slot_texture() {
        let mut h = harness("cached.resize");
        for _ in 0..3 {
            h.feeder.publish(&sized(32, 32), &sample_overlays(1));
            h.cached.maybe_get().unwrap();
        }
        h.feeder.publish(&sized(64, 32), &sample_overlays(1));
        let snapshot = h.cached.maybe_get().unwrap();

        assert_eq!(snapshot.texture::<MockTexture>().dimensions(), PixelSize::new(64, 32));
        let created = h.factory.created();
        assert_eq!(created.len(), 4);
        assert_eq!(created[3], (PixelSize::new(64, 32), 0));
    }

    #[test]
    fn detached_feeder_is_empty() {
        let mut h = harness("cached.detached");
        h.feeder.publish(&sized(32, 32), &sample_overlays(1));
        assert!(h.cached.maybe_get().unwrap().has_texture());

        h.feeder.detach();
        assert_eq!(h.cached.maybe_get().unwrap().state(), SnapshotState::Empty);
        assert_eq!(h.cached.maybe_get_metadata().unwrap().state(), SnapshotState::Empty);
    }

    #[test]
    fn detach_then_resubmit_is_a_new_frame() {
        let mut h = harness("cached.resume");
        let first_config = ShmConfig { global_input_layer_id: 1, ..sized(32, 32) };
        h.feeder.publish(&first_config, &sample_overlays(1));
        let first = h.cached.maybe_get().unwrap();

        h.feeder.pause();
        assert_eq!(h.cached.maybe_get().unwrap().state(), SnapshotState::Empty);
        assert!(h.cached.cache.is_empty());

        let second_config = ShmConfig { global_input_layer_id: 2, ..sized(32, 32) };
        h.feeder.publish(&second_config, &sample_overlays(1));
        let second = h.cached.maybe_get().unwrap();

        assert!(!second.ptr_eq(&first));
        assert_ne!(second.session_id(), first.session_id());
        assert_eq!(second.config().global_input_layer_id, 2);
        assert_eq!(h.copier.copies().len(), 2);
    }

    #[test]
    fn empty_result_falls_back_only_while_fresh() {
        let mut h = harness("cached.fallback");
        h.feeder.publish(&sized(32, 32), &sample_overlays(1));
        let cached = h.cached.maybe_get().unwrap();
        let refreshed = h.cached.updated_at.unwrap();

        assert!(h.cached.fallback(refreshed + Duration::from_millis(50)).ptr_eq(&cached));
        assert_eq!(
            h.cached.fallback(refreshed + Duration::from_millis(150)).state(),
            SnapshotState::Empty
        );

        h.cached = h.cached.with_settings(&CacheSettings { stale_window_ms: 500 });
        assert!(h.cached.fallback(refreshed + Duration::from_millis(150)).ptr_eq(&cached));
    }

    #[test]
    fn copy_failure_propagates_and_keeps_cache() {
        let feeder = TestFeeder::new("cached.copyfail", GPU);
        let mut cached = CachedReader::new(
            feeder.reader(),
            Arc::new(RecordingCopier::failing()),
            Arc::new(MockTextureFactory::default()),
            ConsumerKind::Viewer,
        );
        cached.initialize_cache(GPU, 3);
        feeder.publish(&sized(32, 32), &sample_overlays(1));

        let err = cached.maybe_get().unwrap_err();
        assert!(matches!(err, crate::ShmError::TextureCopy { .. }));
        assert!(cached.cache.is_empty());
    }

    #[test]
    fn wrong_adapter_is_reported() {
        let mut h = harness("cached.gpu");
        h.cached.initialize_cache(GPU + 1, 3);
        h.feeder.publish(&sized(32, 32), &sample_overlays(1));
        assert_eq!(h.cached.maybe_get().unwrap().state(), SnapshotState::IncorrectGpu);
        assert!(h.copier.copies().is_empty());
    }

    #[test]
    #[should_panic(expected = "before initialize_cache")]
    fn maybe_get_requires_initialized_cache() {
        let feeder = TestFeeder::new("cached.uninit", GPU);
        let mut cached = CachedReader::new(
            feeder.reader(),
            Arc::new(RecordingCopier::default()),
            Arc::new(MockTextureFactory::default()),
            ConsumerKind::Viewer,
        );
        let _ = cached.maybe_get();
    }

    #[test]
    fn metadata_path_never_touches_the_ring() {
        let mut h = harness("cached.metadata");
        h.feeder.publish(&sized(32, 32), &sample_overlays(3));

        let first = h.cached.maybe_get_metadata().unwrap();
        assert_eq!(first.state(), SnapshotState::ValidWithoutTexture);
        assert_eq!(first.overlay_count(), 3);
        let locks = h.feeder.region().stats().acquisitions();
        assert!(h.cached.maybe_get_metadata().unwrap().ptr_eq(&first));
        assert_eq!(h.feeder.region().stats().acquisitions(), locks);

        assert!(h.factory.created().is_empty());
        assert!(h.copier.copies().is_empty());
        assert_eq!(h.duplicator.duplicated(), 0);

        // A texture request for the same frame still copies.
        assert!(h.cached.maybe_get().unwrap().has_texture());
    }
}
