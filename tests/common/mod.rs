//! Doubles shared by the integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use overlay_shm::{
    ClientTexture, ClientTextureFactory, HandleDuplicator, NativeHandle, PixelSize, RegionConfig,
    Result, SharedRegion, TextureCopier,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Region in a fresh temporary directory. Keep the directory alive.
pub fn temp_region(app_id: &str) -> (tempfile::TempDir, Arc<SharedRegion>) {
    let dir = tempfile::tempdir().unwrap();
    let app_id = format!("{app_id}.{}", std::process::id());
    let region = SharedRegion::open(&RegionConfig::new(app_id).with_directory(dir.path())).unwrap();
    (dir, region)
}

pub struct Texture {
    pub size: PixelSize,
    pub slot: u8,
}

impl ClientTexture for Texture {
    fn dimensions(&self) -> PixelSize {
        self.size
    }

    fn swapchain_index(&self) -> u8 {
        self.slot
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct Factory {
    pub created: AtomicUsize,
    pub released: AtomicUsize,
}

impl ClientTextureFactory for Factory {
    fn create_client_texture(&self, size: PixelSize, swapchain_index: u8) -> Result<Arc<dyn ClientTexture>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Texture { size, slot: swapchain_index }))
    }

    fn release_ipc_handles(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// `(source, fence, fence_value)` per copy.
#[derive(Default)]
pub struct Copier {
    pub copies: Mutex<Vec<(NativeHandle, NativeHandle, u64)>>,
}

impl TextureCopier for Copier {
    fn copy(
        &self,
        source: NativeHandle,
        _dest: &dyn ClientTexture,
        fence: NativeHandle,
        fence_value_in: u64,
    ) -> Result<()> {
        self.copies.lock().unwrap().push((source, fence, fence_value_in));
        Ok(())
    }
}

/// Local handle = foreign handle + [`LOCAL_OFFSET`].
pub const LOCAL_OFFSET: u64 = 0x10_0000;

#[derive(Default)]
pub struct Duplicator {
    pub opened: AtomicUsize,
    pub duplicated: AtomicUsize,
    pub closed: AtomicUsize,
}

impl HandleDuplicator for Duplicator {
    fn open_process(&self, process_id: u32) -> io::Result<NativeHandle> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(NativeHandle::from_raw(process_id as u64))
    }

    fn duplicate(&self, _process: NativeHandle, foreign: NativeHandle) -> io::Result<NativeHandle> {
        self.duplicated.fetch_add(1, Ordering::SeqCst);
        Ok(NativeHandle::from_raw(foreign.raw() + LOCAL_OFFSET))
    }

    fn close(&self, _handle: NativeHandle) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
