//! The shared frame record.
//!
//! [`FrameMetadata`] is the only thing the feeder and its consumers exchange
//! through shared memory. It is written under the region mutex by the
//! [`Writer`](crate::Writer) and copied out under the same mutex by readers;
//! a handful of fields are additionally probed with atomic loads on the
//! lock-free fast path (see [`SharedRegion`](crate::SharedRegion)).
//!
//! The layout is fixed and part of the region name, so a consumer built
//! against a different layout never maps a feeder's record.

use bytemuck::{Pod, Zeroable};

use crate::ipc::NativeHandle;
use crate::types::{HeaderFlags, OverlayFrameConfig, ShmConfig};

/// Maximum number of overlays a single frame can carry.
pub const MAX_OVERLAY_FRAMES: usize = 16;

/// Number of texture slots the feeder rotates through.
pub const SWAPCHAIN_LENGTH: usize = 3;

/// Sentinel distinguishing a writer-initialized record from zeroed memory.
pub const FRAME_METADATA_MAGIC: u64 = u64::from_ne_bytes(*b"OVLSHM01");

/// Odd 64-bit constant; multiplication by it permutes `u64`.
const FRAME_NUMBER_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Shared frame record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameMetadata {
    pub magic: u64,
    /// Adapter (LUID) that rendered the texture.
    pub gpu_adapter_id: u64,
    pub frame_number: u64,
    pub session_id: u64,
    pub flags: HeaderFlags,
    pub feeder_process_id: u32,
    pub config: ShmConfig,
    /// Authoritative count of entries in `overlay_frame_configs`.
    pub overlay_frame_count: u8,
    pub _pad0: [u8; 7],
    pub overlay_frame_configs: [OverlayFrameConfig; MAX_OVERLAY_FRAMES],
    /// Feeder-local texture handle.
    pub texture: NativeHandle,
    /// Feeder-local fence handle.
    pub fence: NativeHandle,
    /// Fence value signalled once the slot's texture is ready.
    pub frame_ready_fence_values: [i64; SWAPCHAIN_LENGTH],
}

impl Default for FrameMetadata {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl FrameMetadata {
    /// True once a writer has published into this record and not detached.
    pub fn is_valid(&self) -> bool {
        self.magic == FRAME_METADATA_MAGIC && self.flags.feeder_attached()
    }

    pub fn has_feeder(&self) -> bool {
        self.flags.feeder_attached()
    }

    pub fn render_cache_key(&self) -> u64 {
        render_cache_key(self.session_id, self.frame_number)
    }

    /// Swapchain slot holding this frame's texture.
    pub fn swapchain_index(&self) -> usize {
        (self.frame_number % SWAPCHAIN_LENGTH as u64) as usize
    }

    pub fn frame_ready_fence_value(&self) -> u64 {
        self.frame_ready_fence_values[self.swapchain_index()] as u64
    }

    /// Overlay count, clamped so a corrupt record cannot index past the array.
    pub fn overlay_count(&self) -> usize {
        (self.overlay_frame_count as usize).min(MAX_OVERLAY_FRAMES)
    }

    pub fn overlays(&self) -> &[OverlayFrameConfig] {
        &self.overlay_frame_configs[..self.overlay_count()]
    }
}

/// Cache key for a frame: changes whenever the frame number or session does.
pub fn render_cache_key(session_id: u64, frame_number: u64) -> u64 {
    session_id ^ frame_number.wrapping_mul(FRAME_NUMBER_MIX)
}

/// Fresh session id: the feeder's process id in the high word, random low word.
pub fn new_session_id(process_id: u32) -> u64 {
    ((process_id as u64) << 32) | rand::random::<u32>() as u64
}
