//! Named shared region holding one [`FrameMetadata`] record.
//!
//! A region is three named OS objects derived from an application id and the
//! record size: the mapping itself, a mutex guarding it and a readiness event
//! the writer signals after each frame. Whichever process opens the region
//! first creates the objects; everyone else attaches to them.
//!
//! Access comes in two flavours:
//!
//! - [`SharedRegion::lock`] / [`SharedRegion::try_lock`] hand out a
//!   [`RegionGuard`] through which the whole record is copied in or out.
//!   If the previous holder died while holding the mutex the record is
//!   zeroed and the lock is granted anyway.
//! - Lock-free probes ([`SharedRegion::frame_number`],
//!   [`SharedRegion::render_cache_key`], ...) atomically load single fields so
//!   consumers can detect "nothing changed" without touching the mutex.

use std::marker::PhantomData;
use std::mem::{offset_of, size_of};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::RegionConfig;
use crate::metadata::{FrameMetadata, SWAPCHAIN_LENGTH, render_cache_key};
use crate::types::HeaderFlags;
use crate::{Result, ShmError};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use self::unix::RegionBackend;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows::RegionBackend;

#[cfg(not(any(unix, windows)))]
mod unsupported;
#[cfg(not(any(unix, windows)))]
use self::unsupported::RegionBackend;

/// Result of waiting on the readiness event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signaled,
    Timeout,
}

/// How a backend granted the mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockOutcome {
    Acquired,
    /// The previous owner died while holding it; the record may be torn.
    Abandoned,
}

/// Name of the region for an application id.
///
/// The record size is part of the name so builds with different layouts
/// never share a mapping.
pub fn region_name(app_id: &str) -> String {
    format!("{}/SHM-s{:x}", app_id, size_of::<FrameMetadata>())
}

/// Per-handle lock counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionStats {
    /// Blocking `lock()` calls.
    pub locks: u64,
    /// `try_lock()` calls, successful or not.
    pub try_locks: u64,
    /// `try_lock()` calls that found the mutex held.
    pub contended: u64,
    /// Acquisitions that found an abandoned mutex and reset the record.
    pub abandoned: u64,
}

impl RegionStats {
    /// Successful acquisitions through either entry point.
    pub fn acquisitions(&self) -> u64 {
        self.locks + self.try_locks - self.contended
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    locks: AtomicU64,
    try_locks: AtomicU64,
    contended: AtomicU64,
    abandoned: AtomicU64,
}

/// A mapped, named frame record plus its mutex and readiness event.
pub struct SharedRegion {
    name: String,
    backend: RegionBackend,
    stats: StatsCounters,
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion").field("name", &self.name).finish_non_exhaustive()
    }
}

impl SharedRegion {
    /// Create or attach to the region for `config.app_id`.
    pub fn open(config: &RegionConfig) -> Result<Arc<Self>> {
        if config.app_id.is_empty() {
            return Err(ShmError::region_failed("", "application id must not be empty"));
        }
        let name = region_name(&config.app_id);
        let backend = RegionBackend::open(&name, config, size_of::<FrameMetadata>())?;

        info!(region = %name, size = size_of::<FrameMetadata>(), "Opened shared frame region");
        Ok(Arc::new(Self { name, backend, stats: StatsCounters::default() }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the OS objects were created. Fixed at construction.
    pub fn is_valid(&self) -> bool {
        !self.backend.base().is_null()
    }

    /// Block until the mutex is held.
    pub fn lock(&self) -> Result<RegionGuard<'_>> {
        self.stats.locks.fetch_add(1, Ordering::Relaxed);
        let outcome = self.backend.lock()?;
        trace!(region = %self.name, "Region locked");
        Ok(self.grant(outcome))
    }

    /// Take the mutex if nobody holds it.
    pub fn try_lock(&self) -> Result<Option<RegionGuard<'_>>> {
        self.stats.try_locks.fetch_add(1, Ordering::Relaxed);
        match self.backend.try_lock()? {
            Some(outcome) => {
                trace!(region = %self.name, "Region try-locked");
                Ok(Some(self.grant(outcome)))
            }
            None => {
                self.stats.contended.fetch_add(1, Ordering::Relaxed);
                trace!(region = %self.name, "Region lock contended");
                Ok(None)
            }
        }
    }

    fn grant(&self, outcome: LockOutcome) -> RegionGuard<'_> {
        let guard = RegionGuard { region: self, _not_send: PhantomData };
        if outcome == LockOutcome::Abandoned {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            warn!(region = %self.name, "Previous lock holder died, resetting frame record");
            self.store_record(&FrameMetadata::default());
        }
        guard
    }

    pub fn stats(&self) -> RegionStats {
        RegionStats {
            locks: self.stats.locks.load(Ordering::Relaxed),
            try_locks: self.stats.try_locks.load(Ordering::Relaxed),
            contended: self.stats.contended.load(Ordering::Relaxed),
            abandoned: self.stats.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Wake consumers waiting for a frame.
    pub fn signal_frame_ready(&self) -> Result<()> {
        self.backend.signal()
    }

    /// Wait for the next frame signal (synchronous - blocks thread)
    pub fn wait_for_frame(&self, timeout: Duration) -> Result<WaitResult> {
        trace!(region = %self.name, timeout_ms = timeout.as_millis() as u64, "Waiting for frame");
        self.backend.wait(timeout)
    }

    /// Wait for the next frame signal (async - cooperative, non-blocking)
    ///
    /// The OS wait runs on tokio's blocking pool so async workers keep
    /// running. Consumers only get here when the lock-free probes show
    /// nothing new.
    pub async fn wait_for_frame_async(self: &Arc<Self>, timeout: Duration) -> Result<WaitResult> {
        let region = Arc::clone(self);
        tokio::task::spawn_blocking(move || region.wait_for_frame(timeout)).await.map_err(|e| {
            ShmError::Watcher { context: format!("readiness wait task failed: {}", e) }
        })?
    }

    /// Lock-free load of the record's frame number.
    pub fn frame_number(&self) -> u64 {
        self.atomic_u64(offset_of!(FrameMetadata, frame_number)).load(Ordering::Acquire)
    }

    /// Lock-free load of the record's session id.
    pub fn session_id(&self) -> u64 {
        self.atomic_u64(offset_of!(FrameMetadata, session_id)).load(Ordering::Acquire)
    }

    /// Lock-free check of the FEEDER_ATTACHED flag.
    pub fn has_feeder(&self) -> bool {
        let flags = self.atomic_u32(offset_of!(FrameMetadata, flags)).load(Ordering::Acquire);
        HeaderFlags::new(flags).feeder_attached()
    }

    /// Lock-free render cache key; the two loads may straddle a publish, in
    /// which case the key simply differs from any cached one.
    pub fn render_cache_key(&self) -> u64 {
        let session_id = self.session_id();
        render_cache_key(session_id, self.frame_number())
    }

    fn record_ptr(&self) -> *mut FrameMetadata {
        self.backend.base().cast()
    }

    /// Write a record while holding the mutex.
    ///
    /// The fields read by the lock-free probes are only ever written through
    /// atomics, with the frame number stored last so a probe never sees a new
    /// key before the record behind it.
    fn store_record(&self, record: &FrameMetadata) {
        let bytes = bytemuck::bytes_of(record);
        let base = self.backend.base();
        let (probed_start, probed_end) = PROBED_FIELDS;
        // SAFETY: the caller holds the mutex, both ranges lie inside the
        // mapped record, and no lock-free reader touches them.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base, probed_start);
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr().add(probed_end),
                base.add(probed_end),
                bytes.len() - probed_end,
            );
        }
        self.atomic_u64(offset_of!(FrameMetadata, session_id))
            .store(record.session_id, Ordering::Release);
        self.atomic_u32(offset_of!(FrameMetadata, flags))
            .store(record.flags.value(), Ordering::Release);
        self.atomic_u64(offset_of!(FrameMetadata, frame_number))
            .store(record.frame_number, Ordering::Release);
    }

    fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: the mapping is page aligned, lives as long as `self`, and
        // every u64 field of the record sits at an 8-byte aligned offset.
        unsafe { AtomicU64::from_ptr(self.backend.base().add(offset).cast()) }
    }

    fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: as above, for 4-byte fields.
        unsafe { AtomicU32::from_ptr(self.backend.base().add(offset).cast()) }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        debug!(region = %self.name, "Closing shared frame region");
    }
}

/// Byte range `[start, end)` of the fields the lock-free probes load:
/// `frame_number`, `session_id` and `flags`, which are contiguous.
const PROBED_FIELDS: (usize, usize) = (
    offset_of!(FrameMetadata, frame_number),
    offset_of!(FrameMetadata, flags) + size_of::<HeaderFlags>(),
);

const _: () = assert!(
    offset_of!(FrameMetadata, session_id) == offset_of!(FrameMetadata, frame_number) + 8
        && offset_of!(FrameMetadata, flags) == offset_of!(FrameMetadata, session_id) + 8
);

/// Exclusive access to the record. Unlocks on drop.
///
/// Not `Send`: Windows mutexes must be released by the owning thread.
pub struct RegionGuard<'a> {
    region: &'a SharedRegion,
    _not_send: PhantomData<*const ()>,
}

impl<'a> RegionGuard<'a> {
    pub fn region(&self) -> &'a SharedRegion {
        self.region
    }

    /// Copy the record out of shared memory.
    pub fn read(&self) -> FrameMetadata {
        // SAFETY: we hold the mutex; FrameMetadata is Pod so any bytes are valid.
        unsafe { std::ptr::read_volatile(self.region.record_ptr()) }
    }

    /// Replace the whole record.
    pub(crate) fn publish(&mut self, record: &FrameMetadata) {
        self.region.store_record(record);
    }

    /// Zero the record.
    pub(crate) fn reset(&mut self) {
        self.region.store_record(&FrameMetadata::default());
    }

    /// Increment a slot's frame-ready fence value, returning the new value.
    pub(crate) fn increment_fence(&mut self, slot: usize) -> i64 {
        assert!(slot < SWAPCHAIN_LENGTH, "swapchain slot {slot} out of range");
        let offset =
            offset_of!(FrameMetadata, frame_ready_fence_values) + slot * size_of::<i64>();
        // SAFETY: in-bounds, 8-byte aligned field of the mapped record.
        let value = unsafe { AtomicI64::from_ptr(self.region.backend.base().add(offset).cast()) };
        value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.region.backend.flush()
    }

    /// Release the mutex now rather than at end of scope.
    pub fn unlock(self) {}
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        self.region.backend.unlock();
        trace!(region = %self.region.name, "Region unlocked");
    }
}
