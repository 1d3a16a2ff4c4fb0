//! Test doubles for the graphics and OS seams, plus a throwaway feeder.
//!
//! Nothing here touches a GPU or a second process: [`MockTexture`] stands in
//! for a client texture, [`RecordingCopier`] records copies instead of
//! performing them, and [`CountingDuplicator`] hands out predictable local
//! handles while counting opens, duplicates and closes.

#![cfg(any(test, feature = "benchmark"))]

use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::RegionConfig;
use crate::ipc::{HandleDuplicator, NativeHandle};
use crate::reader::Reader;
use crate::region::SharedRegion;
use crate::texture::{ClientTexture, ClientTextureFactory, TextureCopier};
use crate::types::{OverlayFrameConfig, PixelRect, PixelSize, ShmConfig};
use crate::writer::Writer;
use crate::{Result, ShmError};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_REGION: AtomicUsize = AtomicUsize::new(0);

/// Client texture with no backing storage.
#[derive(Debug)]
pub struct MockTexture {
    id: u64,
    size: PixelSize,
    swapchain_index: u8,
}

impl MockTexture {
    pub fn new(size: PixelSize, swapchain_index: u8) -> Self {
        Self { id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed), size, swapchain_index }
    }

    /// Unique per instance, so tests can tell a recreated texture apart.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ClientTexture for MockTexture {
    fn dimensions(&self) -> PixelSize {
        self.size
    }

    fn swapchain_index(&self) -> u8 {
        self.swapchain_index
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Creates [`MockTexture`]s and counts calls.
#[derive(Debug, Default)]
pub struct MockTextureFactory {
    created: Mutex<Vec<(PixelSize, u8)>>,
    released: AtomicUsize,
}

impl MockTextureFactory {
    /// `(size, swapchain_index)` of every texture created so far.
    pub fn created(&self) -> Vec<(PixelSize, u8)> {
        self.created.lock().unwrap().clone()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl ClientTextureFactory for MockTextureFactory {
    fn create_client_texture(&self, size: PixelSize, swapchain_index: u8) -> Result<Arc<dyn ClientTexture>> {
        self.created.lock().unwrap().push((size, swapchain_index));
        Ok(Arc::new(MockTexture::new(size, swapchain_index)))
    }

    fn release_ipc_handles(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One call to [`RecordingCopier::copy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRecord {
    pub source: NativeHandle,
    pub fence: NativeHandle,
    pub fence_value: u64,
    pub dest_slot: u8,
}

/// Records copies; optionally fails every one of them.
#[derive(Debug, Default)]
pub struct RecordingCopier {
    copies: Mutex<Vec<CopyRecord>>,
    fail: bool,
}

impl RecordingCopier {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        self.copies.lock().unwrap().clone()
    }
}

impl TextureCopier for RecordingCopier {
    fn copy(
        &self,
        source: NativeHandle,
        dest: &dyn ClientTexture,
        fence: NativeHandle,
        fence_value_in: u64,
    ) -> Result<()> {
        if self.fail {
            return Err(ShmError::texture_copy_failed("device removed"));
        }
        self.copies.lock().unwrap().push(CopyRecord {
            source,
            fence,
            fence_value: fence_value_in,
            dest_slot: dest.swapchain_index(),
        });
        Ok(())
    }
}

const LOCAL_HANDLE_BIT: u64 = 1 << 40;
const PROCESS_HANDLE_BASE: u64 = 1 << 41;

/// Duplicator that never leaves this process.
///
/// Local handles are the foreign ones with [`LOCAL_HANDLE_BIT`] set, see
/// [`CountingDuplicator::local_for`].
#[derive(Debug, Default)]
pub struct CountingDuplicator {
    opened: AtomicUsize,
    duplicated: AtomicUsize,
    closed: AtomicUsize,
    fail: bool,
}

impl CountingDuplicator {
    /// Opens processes but refuses every duplication.
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn local_for(&self, foreign: NativeHandle) -> NativeHandle {
        NativeHandle::from_raw(foreign.raw() | LOCAL_HANDLE_BIT)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn duplicated(&self) -> usize {
        self.duplicated.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl HandleDuplicator for CountingDuplicator {
    fn open_process(&self, process_id: u32) -> io::Result<NativeHandle> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(NativeHandle::from_raw(PROCESS_HANDLE_BASE + process_id as u64))
    }

    fn duplicate(&self, _process: NativeHandle, foreign: NativeHandle) -> io::Result<NativeHandle> {
        if self.fail {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        self.duplicated.fetch_add(1, Ordering::SeqCst);
        Ok(self.local_for(foreign))
    }

    fn close(&self, _handle: NativeHandle) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// `n` overlays stacked vertically on the shared texture.
pub fn sample_overlays(n: usize) -> Vec<OverlayFrameConfig> {
    (0..n)
        .map(|i| OverlayFrameConfig {
            overlay_id: 0x100 + i as u64,
            location_on_texture: PixelRect::new(0, 64 * i as i32, 256, 64),
            screen_rect: PixelRect::new(16, 16 + 80 * i as i32, 256, 64),
            vr_enabled: (i % 2) as u8,
            ..Default::default()
        })
        .collect()
}

/// A feeder publishing into a region under a temporary directory.
pub struct TestFeeder {
    region: Arc<SharedRegion>,
    gpu_adapter_id: u64,
    writer: Mutex<Option<Writer>>,
    handles: Mutex<(NativeHandle, NativeHandle)>,
    // Dropped last: the region's files live here.
    _dir: tempfile::TempDir,
}

impl TestFeeder {
    pub fn new(app_id: &str, gpu_adapter_id: u64) -> Self {
        let mut feeder = Self::without_writer(app_id);
        feeder.gpu_adapter_id = gpu_adapter_id;
        feeder.attach(gpu_adapter_id);
        feeder
    }

    /// Region only; nobody has ever written to it.
    ///
    /// Each call gets its own region even for the same `app_id`; Windows
    /// section names ignore the directory.
    pub fn without_writer(app_id: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let app_id = format!(
            "{app_id}.{}.{}",
            std::process::id(),
            NEXT_REGION.fetch_add(1, Ordering::Relaxed)
        );
        let region = SharedRegion::open(&RegionConfig::new(app_id).with_directory(dir.path())).unwrap();
        Self {
            region,
            gpu_adapter_id: 0,
            writer: Mutex::new(None),
            handles: Mutex::new((NativeHandle::from_raw(0x400), NativeHandle::from_raw(0x404))),
            _dir: dir,
        }
    }

    fn attach(&self, gpu_adapter_id: u64) {
        let writer = Writer::new(Arc::clone(&self.region), gpu_adapter_id).unwrap();
        *self.writer.lock().unwrap() = Some(writer);
    }

    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    pub fn reader(&self) -> Reader {
        self.reader_with(Arc::new(CountingDuplicator::default()))
    }

    pub fn reader_with(&self, duplicator: Arc<CountingDuplicator>) -> Reader {
        Reader::with_duplicator(Arc::clone(&self.region), duplicator)
    }

    pub fn session_id(&self) -> u64 {
        self.writer.lock().unwrap().as_ref().map(Writer::session_id).unwrap_or_default()
    }

    pub fn texture_handle(&self) -> NativeHandle {
        self.handles.lock().unwrap().0
    }

    /// Publish later frames with different feeder handles.
    pub fn set_handles(&self, texture: u64, fence: u64) {
        *self.handles.lock().unwrap() = (NativeHandle::from_raw(texture), NativeHandle::from_raw(fence));
    }

    /// Begin and submit one frame.
    pub fn publish(&self, config: &ShmConfig, overlays: &[OverlayFrameConfig]) {
        let (texture, fence) = *self.handles.lock().unwrap();
        let writer = self.writer.lock().unwrap();
        let Some(writer) = writer.as_ref() else {
            panic!("TestFeeder has no writer attached");
        };
        let mut lock = writer.lock().unwrap();
        lock.begin_frame();
        lock.submit_frame(config, overlays, texture, fence).unwrap();
    }

    /// Detach the writer; consumers see `Empty` afterwards.
    pub fn detach(&self) {
        self.writer.lock().unwrap().take();
    }

    /// Detach the record but keep the writer; the next publish resumes it.
    pub fn pause(&self) {
        if let Some(writer) = self.writer.lock().unwrap().as_ref() {
            writer.detach().unwrap();
        }
    }

    /// Detach and attach a new writer, starting a new session.
    pub fn restart(&self) {
        self.detach();
        let gpu_adapter_id = self.gpu_adapter_id;
        self.attach(gpu_adapter_id);
    }

    pub fn gpu_adapter_id(&self) -> u64 {
        self.gpu_adapter_id
    }
}
