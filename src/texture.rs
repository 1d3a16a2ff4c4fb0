//! Graphics-backend collaborators.
//!
//! The crate never talks to a GPU API itself. Consumers plug in their backend
//! through these traits: a [`ClientTextureFactory`] creates textures in the
//! consumer's device, and a [`TextureCopier`] copies the feeder's shared
//! texture into one of them after waiting on the feeder's fence.

use std::any::Any;
use std::sync::Arc;

use crate::Result;
use crate::ipc::NativeHandle;
use crate::types::PixelSize;

/// A texture owned by the consumer, one per swapchain slot of the cached
/// reader's ring.
pub trait ClientTexture: Send + Sync + 'static {
    fn dimensions(&self) -> PixelSize;

    fn swapchain_index(&self) -> u8;

    /// Downcast hook for [`Snapshot::texture`](crate::Snapshot::texture).
    fn as_any(&self) -> &dyn Any;
}

/// Copies a duplicated feeder texture into a client texture.
pub trait TextureCopier: Send + Sync {
    /// Wait for `fence` to reach `fence_value_in`, then copy `source` into
    /// `dest`. `source` and `fence` are handles local to this process.
    fn copy(
        &self,
        source: NativeHandle,
        dest: &dyn ClientTexture,
        fence: NativeHandle,
        fence_value_in: u64,
    ) -> Result<()>;
}

/// Creates client textures for the cached reader's ring.
pub trait ClientTextureFactory: Send + Sync {
    fn create_client_texture(&self, size: PixelSize, swapchain_index: u8)
    -> Result<Arc<dyn ClientTexture>>;

    /// Called when the feeder session changes, before any handle from the new
    /// session is duplicated. Backends drop resources opened from old handles.
    fn release_ipc_handles(&self) {}
}
