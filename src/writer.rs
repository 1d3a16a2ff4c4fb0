//! Feeder side of the frame exchange.
//!
//! A feeder renders into the texture of the slot returned by
//! [`WriterLock::begin_frame`], signals the returned fence value on its GPU
//! queue, then publishes with [`WriterLock::submit_frame`]:
//!
//! ```rust,no_run
//! use overlay_shm::{NativeHandle, RegionConfig, SharedRegion, ShmConfig, Writer};
//!
//! # fn main() -> overlay_shm::Result<()> {
//! let region = SharedRegion::open(&RegionConfig::default())?;
//! let writer = Writer::new(region, 0x1234)?;
//!
//! let mut lock = writer.lock()?;
//! let next = lock.begin_frame();
//! // ... render into slot `next.texture_index`, signal `next.fence_out` ...
//! lock.submit_frame(&ShmConfig::default(), &[], NativeHandle::NULL, NativeHandle::NULL)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

use crate::Result;
use crate::ipc::NativeHandle;
use crate::metadata::{
    FRAME_METADATA_MAGIC, FrameMetadata, MAX_OVERLAY_FRAMES, SWAPCHAIN_LENGTH, new_session_id,
};
use crate::region::{RegionGuard, SharedRegion};
use crate::types::{HeaderFlags, OverlayFrameConfig, ShmConfig};

/// Where the feeder should render the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextFrameInfo {
    /// Swapchain slot to render into.
    pub texture_index: usize,
    /// Fence value to signal once rendering into that slot completes.
    pub fence_out: i64,
}

/// Publishes frames into a shared region.
///
/// Dropping the writer detaches it, so consumers see `Empty` snapshots.
pub struct Writer {
    region: Arc<SharedRegion>,
    process_id: u32,
    gpu_adapter_id: u64,
    session_id: AtomicU64,
}

impl Writer {
    /// Take ownership of the region's record and start a new session.
    pub fn new(region: Arc<SharedRegion>, gpu_adapter_id: u64) -> Result<Self> {
        let process_id = std::process::id();
        let session_id = new_session_id(process_id);
        {
            let mut guard = region.lock()?;
            let mut record = fresh_record(process_id, gpu_adapter_id, session_id);
            // Keep the frame number moving so a restarted feeder never
            // reproduces a consumer's cached key.
            record.frame_number = guard.read().frame_number;
            guard.publish(&record);
        }

        info!(
            region = region.name(),
            process_id,
            session_id = %format!("{session_id:#x}"),
            gpu_adapter_id = %format!("{gpu_adapter_id:#x}"),
            "Writer attached"
        );
        Ok(Self { region, process_id, gpu_adapter_id, session_id: AtomicU64::new(session_id) })
    }

    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    pub fn session_id(&self) -> u64 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn gpu_adapter_id(&self) -> u64 {
        self.gpu_adapter_id
    }

    /// Block until the region is ours.
    pub fn lock(&self) -> Result<WriterLock<'_>> {
        Ok(WriterLock { writer: self, guard: self.region.lock()? })
    }

    /// Take the region if no consumer is copying out of it.
    pub fn try_lock(&self) -> Result<Option<WriterLock<'_>>> {
        Ok(self.region.try_lock()?.map(|guard| WriterLock { writer: self, guard }))
    }

    /// Zero the record so consumers stop showing this feeder's frames.
    ///
    /// Frames submitted afterwards belong to a new session.
    pub fn detach(&self) -> Result<()> {
        self.lock()?.detach()
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!(region = self.region.name(), error = %e, "Failed to detach writer");
        }
    }
}

/// The region, locked by a [`Writer`].
pub struct WriterLock<'a> {
    writer: &'a Writer,
    guard: RegionGuard<'a>,
}

impl WriterLock<'_> {
    /// Reserve the next slot and bump its frame-ready fence value.
    ///
    /// Nothing is published; consumers keep seeing the previous frame.
    pub fn begin_frame(&mut self) -> NextFrameInfo {
        let frame_number = self.guard.read().frame_number;
        let texture_index = (frame_number.wrapping_add(1) % SWAPCHAIN_LENGTH as u64) as usize;
        let fence_out = self.guard.increment_fence(texture_index);
        trace!(frame_number, texture_index, fence_out, "Began frame");
        NextFrameInfo { texture_index, fence_out }
    }

    /// Publish a frame and wake waiting consumers.
    ///
    /// # Panics
    ///
    /// If `overlays` holds more than [`MAX_OVERLAY_FRAMES`] entries.
    pub fn submit_frame(
        &mut self,
        config: &ShmConfig,
        overlays: &[OverlayFrameConfig],
        texture: NativeHandle,
        fence: NativeHandle,
    ) -> Result<()> {
        assert!(
            overlays.len() <= MAX_OVERLAY_FRAMES,
            "Asked to publish {} overlays, but at most {} fit in a frame",
            overlays.len(),
            MAX_OVERLAY_FRAMES
        );

        let mut record = self.attached_record();
        record.config = *config;
        record.frame_number = record.frame_number.wrapping_add(1);
        record.texture = texture;
        record.fence = fence;
        record.overlay_frame_count = overlays.len() as u8;
        record.overlay_frame_configs = Default::default();
        record.overlay_frame_configs[..overlays.len()].copy_from_slice(overlays);
        self.guard.publish(&record);

        trace!(
            frame_number = record.frame_number,
            overlays = overlays.len(),
            texture = %texture,
            "Submitted frame"
        );
        self.guard.region().signal_frame_ready()
    }

    /// Publish a frame with nothing to show.
    pub fn submit_empty_frame(&mut self) -> Result<()> {
        let mut record = self.attached_record();
        record.frame_number = record.frame_number.wrapping_add(1);
        record.overlay_frame_count = 0;
        self.guard.publish(&record);

        trace!(frame_number = record.frame_number, "Submitted empty frame");
        self.guard.region().signal_frame_ready()
    }

    /// Zero the record and flush it. The frame number restarts, so the
    /// writer moves to a new session.
    pub fn detach(mut self) -> Result<()> {
        self.guard.reset();
        self.guard.flush()?;
        let writer = self.writer;
        let previous = writer.session_id();
        let session_id = loop {
            let next = new_session_id(writer.process_id);
            if next != previous {
                break next;
            }
        };
        writer.session_id.store(session_id, Ordering::Release);
        debug!(
            region = self.guard.region().name(),
            next_session_id = %format!("{session_id:#x}"),
            "Writer detached"
        );
        Ok(())
    }

    pub fn unlock(self) {}

    /// Current record with the writer identity stamped on it. A zeroed
    /// record starts over from the defaults.
    fn attached_record(&self) -> FrameMetadata {
        let writer = self.writer;
        let session_id = writer.session_id();
        let mut record = self.guard.read();
        if record.magic != FRAME_METADATA_MAGIC {
            let frame_number = record.frame_number;
            record = fresh_record(writer.process_id, writer.gpu_adapter_id, session_id);
            record.frame_number = frame_number;
        }
        record.session_id = session_id;
        record.feeder_process_id = writer.process_id;
        record.gpu_adapter_id = writer.gpu_adapter_id;
        record.flags.set(HeaderFlags::FEEDER_ATTACHED);
        record
    }
}

fn fresh_record(process_id: u32, gpu_adapter_id: u64, session_id: u64) -> FrameMetadata {
    FrameMetadata {
        magic: FRAME_METADATA_MAGIC,
        gpu_adapter_id,
        session_id,
        feeder_process_id: process_id,
        config: ShmConfig::default(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::reader::Reader;
    use crate::snapshot::SnapshotState;
    use crate::types::{ConsumerKind, ConsumerPattern, PixelRect};

    fn writer_in(dir: &tempfile::TempDir) -> Writer {
        let region =
            SharedRegion::open(&RegionConfig::new("writer").with_directory(dir.path())).unwrap();
        Writer::new(region, 0xBEEF).unwrap()
    }

    fn overlays(n: usize) -> Vec<OverlayFrameConfig> {
        (0..n)
            .map(|i| OverlayFrameConfig {
                overlay_id: i as u64,
                location_on_texture: PixelRect::new(0, 100 * i as i32, 100, 100),
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn new_writer_is_not_yet_visible() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        let record = writer.region().lock().unwrap().read();
        assert_eq!(record.magic, FRAME_METADATA_MAGIC);
        assert!(!record.has_feeder());
        assert_eq!(record.session_id, writer.session_id());
        assert_eq!(record.session_id >> 32, std::process::id() as u64);
    }

    #[test]
    fn submit_publishes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        let config = ShmConfig { global_input_layer_id: 3, ..Default::default() };

        let mut lock = writer.lock().unwrap();
        lock.begin_frame();
        lock.submit_frame(&config, &overlays(2), NativeHandle::from_raw(0x40), NativeHandle::from_raw(0x44))
            .unwrap();
        lock.unlock();

        let record = writer.region().lock().unwrap().read();
        assert!(record.is_valid());
        assert_eq!(record.frame_number, 1);
        assert_eq!(record.gpu_adapter_id, 0xBEEF);
        assert_eq!(record.feeder_process_id, std::process::id());
        assert_eq!(record.config, config);
        assert_eq!(record.overlays(), &overlays(2)[..]);
        assert_eq!(record.texture, NativeHandle::from_raw(0x40));
        assert_eq!(record.fence, NativeHandle::from_raw(0x44));
        assert_eq!(record.frame_ready_fence_values[1], 1);
    }

    #[test]
    fn swapchain_wraps_with_increasing_fences() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        let mut last_fence = [0i64; SWAPCHAIN_LENGTH];

        for cycle in 0..10 {
            let mut lock = writer.lock().unwrap();
            let next = lock.begin_frame();
            assert_eq!(next.texture_index, (cycle + 1) % SWAPCHAIN_LENGTH);
            assert!(next.fence_out > last_fence[next.texture_index]);
            last_fence[next.texture_index] = next.fence_out;
            lock.submit_frame(&ShmConfig::default(), &overlays(1), NativeHandle::NULL, NativeHandle::NULL)
                .unwrap();
        }

        assert_eq!(writer.region().frame_number(), 10);
        assert_eq!(last_fence, [3, 4, 3]);
    }

    #[test]
    fn empty_frame_clears_overlays_but_advances() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        let mut lock = writer.lock().unwrap();
        lock.submit_frame(&ShmConfig::default(), &overlays(3), NativeHandle::NULL, NativeHandle::NULL)
            .unwrap();
        lock.submit_empty_frame().unwrap();
        let record = lock.guard.read();
        assert_eq!(record.frame_number, 2);
        assert_eq!(record.overlay_count(), 0);
        assert!(record.is_valid());
    }

    #[test]
    #[should_panic(expected = "at most 16 fit in a frame")]
    fn too_many_overlays_panics() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        let mut lock = writer.lock().unwrap();
        let _ = lock.submit_frame(
            &ShmConfig::default(),
            &overlays(MAX_OVERLAY_FRAMES + 1),
            NativeHandle::NULL,
            NativeHandle::NULL,
        );
    }

    #[test]
    fn detach_and_drop_zero_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        let region = Arc::clone(writer.region());
        writer
            .lock()
            .unwrap()
            .submit_frame(&ShmConfig::default(), &overlays(1), NativeHandle::NULL, NativeHandle::NULL)
            .unwrap();
        assert!(region.has_feeder());

        let first_session = writer.session_id();
        writer.detach().unwrap();
        assert!(!region.has_feeder());
        assert_eq!(region.frame_number(), 0);
        assert_ne!(writer.session_id(), first_session);

        writer
            .lock()
            .unwrap()
            .submit_empty_frame()
            .unwrap();
        assert!(region.has_feeder());
        assert_eq!(region.frame_number(), 1);
        assert_eq!(region.session_id(), writer.session_id());
        drop(writer);
        assert!(!region.has_feeder());
    }

    #[test]
    fn empty_frame_from_fresh_writer_targets_every_kind() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        writer.lock().unwrap().submit_empty_frame().unwrap();

        let reader = Reader::new(Arc::clone(writer.region()));
        for kind in ConsumerKind::ALL {
            let snapshot = reader.maybe_get_uncached(kind).unwrap();
            assert_eq!(snapshot.state(), SnapshotState::ValidWithoutTexture, "{kind:?}");
        }
    }

    #[test]
    fn resubmit_after_detach_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer_in(&dir);
        let config = ShmConfig { target: ConsumerPattern::VR, ..Default::default() };
        writer
            .lock()
            .unwrap()
            .submit_frame(&config, &overlays(1), NativeHandle::NULL, NativeHandle::NULL)
            .unwrap();
        writer.detach().unwrap();
        writer.lock().unwrap().submit_empty_frame().unwrap();

        let record = writer.region().lock().unwrap().read();
        assert_eq!(record.magic, FRAME_METADATA_MAGIC);
        assert_eq!(record.config, ShmConfig::default());
        assert_eq!(record.gpu_adapter_id, 0xBEEF);
    }

    #[test]
    fn restarted_writer_changes_session_and_keeps_counting() {
        let dir = tempfile::tempdir().unwrap();
        let region =
            SharedRegion::open(&RegionConfig::new("writer").with_directory(dir.path())).unwrap();

        let first = Writer::new(Arc::clone(&region), 1).unwrap();
        first.lock().unwrap().submit_empty_frame().unwrap();
        let first_session = first.session_id();
        // Simulate a crash: no detach.
        std::mem::forget(first);

        let second = Writer::new(Arc::clone(&region), 1).unwrap();
        assert_ne!(second.session_id(), first_session);
        assert_eq!(region.frame_number(), 1);
    }
}
