//! Cross-process handle duplication.
//!
//! The feeder publishes its own (process-local) texture and fence handles in
//! the shared record. A consumer cannot use them directly: it opens the feeder
//! process and duplicates each handle into its own handle table, once per
//! session and swapchain slot. [`HandleDuplicator`] is the narrow seam over
//! the OS calls so tests can count duplications without a second process.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::trace;

use crate::{Result, ShmError};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::PidfdDuplicator;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::Win32Duplicator;

/// Raw OS handle (Windows `HANDLE` or Unix file descriptor) as stored in the
/// shared record.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NativeHandle(u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub const fn from_raw(raw: u64) -> Self {
        NativeHandle(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// OS operations needed to pull handles out of the feeder process.
pub trait HandleDuplicator: Send + Sync {
    /// Open `process_id` with the right to duplicate its handles.
    fn open_process(&self, process_id: u32) -> io::Result<NativeHandle>;

    /// Duplicate `foreign`, a handle owned by `process`, into this process.
    fn duplicate(&self, process: NativeHandle, foreign: NativeHandle) -> io::Result<NativeHandle>;

    /// Close a handle returned by `open_process` or `duplicate`.
    fn close(&self, handle: NativeHandle);
}

/// Duplicator for the current platform.
pub fn default_duplicator() -> Arc<dyn HandleDuplicator> {
    #[cfg(windows)]
    {
        Arc::new(Win32Duplicator)
    }
    #[cfg(target_os = "linux")]
    {
        Arc::new(PidfdDuplicator)
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
        Arc::new(UnsupportedDuplicator)
    }
}

/// Fails every operation; used where the OS offers no handle duplication.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedDuplicator;

impl HandleDuplicator for UnsupportedDuplicator {
    fn open_process(&self, _process_id: u32) -> io::Result<NativeHandle> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "handle duplication needs Windows or Linux"))
    }

    fn duplicate(&self, _process: NativeHandle, _foreign: NativeHandle) -> io::Result<NativeHandle> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "handle duplication needs Windows or Linux"))
    }

    fn close(&self, _handle: NativeHandle) {}
}

/// A handle this process owns; closed through its duplicator on drop.
pub struct OwnedHandle {
    raw: NativeHandle,
    owner: Arc<dyn HandleDuplicator>,
}

impl OwnedHandle {
    pub fn new(raw: NativeHandle, owner: Arc<dyn HandleDuplicator>) -> Self {
        Self { raw, owner }
    }

    pub fn raw(&self) -> NativeHandle {
        self.raw
    }

    /// Open the feeder process for duplication.
    pub fn open_process(owner: &Arc<dyn HandleDuplicator>, process_id: u32) -> Result<Self> {
        let raw = owner
            .open_process(process_id)
            .map_err(|e| ShmError::ProcessOpen { process_id, source: Some(Box::new(e)) })?;
        trace!(process_id, handle = %raw, "Opened feeder process");
        Ok(Self::new(raw, Arc::clone(owner)))
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedHandle").field(&self.raw).finish()
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            self.owner.close(self.raw);
        }
    }
}

/// Texture and fence handles duplicated from the feeder for one swapchain slot.
#[derive(Debug)]
pub struct IpcHandles {
    texture: OwnedHandle,
    fence: OwnedHandle,
    foreign_texture: NativeHandle,
    foreign_fence: NativeHandle,
}

impl IpcHandles {
    /// Duplicate the feeder's `texture` and `fence` into this process.
    pub fn duplicate(
        duplicator: &Arc<dyn HandleDuplicator>,
        feeder_process: &OwnedHandle,
        process_id: u32,
        texture: NativeHandle,
        fence: NativeHandle,
    ) -> Result<Self> {
        let dup = |foreign: NativeHandle| -> Result<OwnedHandle> {
            let raw = duplicator.duplicate(feeder_process.raw(), foreign).map_err(|e| {
                ShmError::HandleDuplication { process_id, handle: foreign, source: Some(Box::new(e)) }
            })?;
            Ok(OwnedHandle::new(raw, Arc::clone(duplicator)))
        };

        let local_texture = dup(texture)?;
        let local_fence = dup(fence)?;
        trace!(
            process_id,
            texture = %texture,
            fence = %fence,
            local_texture = %local_texture.raw(),
            local_fence = %local_fence.raw(),
            "Duplicated feeder handles"
        );
        Ok(Self {
            texture: local_texture,
            fence: local_fence,
            foreign_texture: texture,
            foreign_fence: fence,
        })
    }

    /// Whether these handles were duplicated from exactly these feeder handles.
    pub fn matches(&self, texture: NativeHandle, fence: NativeHandle) -> bool {
        self.foreign_texture == texture && self.foreign_fence == fence
    }

    pub fn texture(&self) -> NativeHandle {
        self.texture.raw()
    }

    pub fn fence(&self) -> NativeHandle {
        self.fence.raw()
    }
}
