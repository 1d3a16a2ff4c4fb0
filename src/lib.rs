//! Shared-memory frame exchange between an overlay feeder and its consumers.
//!
//! One feeder process renders overlays into a small swapchain of shared GPU
//! textures and publishes a fixed-size [`FrameMetadata`] record into a named
//! shared region. Any number of consumers (VR compositor layers, flat-screen
//! injectors, a desktop viewer) read the record, duplicate the feeder's
//! texture and fence handles into their own process and copy the current
//! frame into a texture they own.
//!
//! # Features
//!
//! - **Lock-scoped exchange**: the region lock is held only to copy the record
//! - **Lock-free fast path**: unchanged frames are detected without the lock
//! - **Session tracking**: a restarted feeder invalidates every cached handle
//! - **Backend agnostic**: GPU work goes through [`TextureCopier`] and
//!   [`ClientTextureFactory`] implemented by the consumer
//! - **Async watcher**: [`FrameWatcher`] streams metadata-only snapshots
//!
//! # Quick Start
//!
//! ## Feeder
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
//! // ... render into `next.texture_index`, signal `next.fence_out` ...
//! lock.submit_frame(&ShmConfig::default(), &[], NativeHandle::from_raw(0x40), NativeHandle::from_raw(0x44))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Consumer
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use overlay_shm::{
//!     CachedReader, ClientTextureFactory, ConsumerKind, Reader, RegionConfig, SharedRegion,
//!     TextureCopier,
//! };
//!
//! # fn consume(copier: Arc<dyn TextureCopier>, factory: Arc<dyn ClientTextureFactory>) -> overlay_shm::Result<()> {
//! let region = SharedRegion::open(&RegionConfig::default())?;
//! let mut cached = CachedReader::new(Reader::new(region), copier, factory, ConsumerKind::OpenXr);
//! cached.initialize_cache(0x1234, 3);
//!
//! let snapshot = cached.maybe_get()?;
//! for i in 0..snapshot.overlay_count() {
//!     let overlay = snapshot.overlay_frame_config(i);
//!     // ... submit a layer sampling `overlay.location_on_texture` ...
//! #   let _ = overlay;
//! }
//! # Ok(())
//! # }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod metadata;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Shared region and the OS seams around it
pub mod ipc;
pub mod region;
pub mod texture;

// Frame exchange
pub mod cached_reader;
pub mod reader;
pub mod snapshot;
pub mod writer;

// Async watcher architecture
pub mod driver;
pub mod provider;
pub mod providers;
pub mod stream;
pub mod watcher;

// Core exports
pub use error::*;
pub use types::*;

pub use config::{CacheSettings, DEFAULT_APP_ID, RegionConfig, ShmSettings, WatcherSettings};
pub use metadata::{FrameMetadata, MAX_OVERLAY_FRAMES, SWAPCHAIN_LENGTH};

// Region and OS seam exports
pub use ipc::{HandleDuplicator, IpcHandles, NativeHandle, OwnedHandle, default_duplicator};
pub use region::{RegionGuard, RegionStats, SharedRegion, WaitResult, region_name};
pub use texture::{ClientTexture, ClientTextureFactory, TextureCopier};

// Main API exports
pub use cached_reader::CachedReader;
pub use reader::Reader;
pub use snapshot::{Snapshot, SnapshotState};
pub use writer::{NextFrameInfo, Writer, WriterLock};

pub use provider::FrameSource;
pub use providers::RegionSource;
pub use watcher::FrameWatcher;
