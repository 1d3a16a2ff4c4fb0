//! Named section, mutex and event objects for Windows.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::time::Duration;
use tracing::{debug, warn};
use windows::Win32::Foundation::{
    CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, FlushViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS,
    MapViewOfFile, PAGE_READWRITE, UnmapViewOfFile,
};
use windows::Win32::System::Threading::{
    CreateEventW, CreateMutexW, INFINITE, ReleaseMutex, SetEvent, WaitForSingleObject,
};
use windows::core::PCWSTR;

use super::{LockOutcome, WaitResult};
use crate::config::RegionConfig;
use crate::{Result, ShmError};

pub(super) struct RegionBackend {
    mapping: HANDLE,
    base: NonNull<u8>,
    size: usize,
    mutex: HANDLE,
    event: HANDLE,
}

impl RegionBackend {
    pub(super) fn open(name: &str, _config: &RegionConfig, size: usize) -> Result<Self> {
        let mapping = unsafe {
            let wide_name = wide_string(name);
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                0,
                size as u32,
                PCWSTR::from_raw(wide_name.as_ptr()),
            )
            .map_err(|e| ShmError::windows_api_error("CreateFileMappingW", e))?
        };

        let base = unsafe {
            let view = MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, size);
            match NonNull::new(view.Value as *mut u8) {
                Some(base) => base,
                None => {
                    let win_err = windows::core::Error::from_thread();
                    let _ = CloseHandle(mapping);
                    return Err(ShmError::windows_api_error("MapViewOfFile", win_err));
                }
            }
        };

        // From here on Drop cleans up whatever was created.
        let mut backend =
            Self { mapping, base, size, mutex: HANDLE::default(), event: HANDLE::default() };

        backend.mutex = unsafe {
            let wide_name = wide_string(&format!("{name}.mutex"));
            CreateMutexW(None, false, PCWSTR::from_raw(wide_name.as_ptr()))
                .map_err(|e| ShmError::windows_api_error("CreateMutexW", e))?
        };

        // Auto-reset: each signal releases one wait.
        backend.event = unsafe {
            let wide_name = wide_string(&format!("{name}.event"));
            CreateEventW(None, false, false, PCWSTR::from_raw(wide_name.as_ptr()))
                .map_err(|e| ShmError::windows_api_error("CreateEventW", e))?
        };

        debug!(region = name, "Created or attached to named Windows objects");
        Ok(backend)
    }

    pub(super) fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(super) fn lock(&self) -> Result<LockOutcome> {
        let result = unsafe { WaitForSingleObject(self.mutex, INFINITE) };
        match result {
            WAIT_OBJECT_0 => Ok(LockOutcome::Acquired),
            WAIT_ABANDONED => Ok(LockOutcome::Abandoned),
            _ => {
                let win_err = windows::core::Error::from_thread();
                Err(ShmError::windows_api_error("WaitForSingleObject(mutex)", win_err))
            }
        }
    }

    pub(super) fn try_lock(&self) -> Result<Option<LockOutcome>> {
        let result = unsafe { WaitForSingleObject(self.mutex, 0) };
        match result {
            WAIT_OBJECT_0 => Ok(Some(LockOutcome::Acquired)),
            WAIT_ABANDONED => Ok(Some(LockOutcome::Abandoned)),
            WAIT_TIMEOUT => Ok(None),
            _ => {
                let win_err = windows::core::Error::from_thread();
                Err(ShmError::windows_api_error("WaitForSingleObject(mutex)", win_err))
            }
        }
    }

    pub(super) fn unlock(&self) {
        if let Err(e) = unsafe { ReleaseMutex(self.mutex) } {
            warn!(error = %e, "ReleaseMutex failed");
        }
    }

    pub(super) fn signal(&self) -> Result<()> {
        unsafe { SetEvent(self.event) }.map_err(|e| ShmError::windows_api_error("SetEvent", e))
    }

    pub(super) fn wait(&self, timeout: Duration) -> Result<WaitResult> {
        // INFINITE is u32::MAX; stay one below so a huge timeout still ends.
        let ms = timeout.as_millis().min((INFINITE - 1) as u128) as u32;
        let result = unsafe { WaitForSingleObject(self.event, ms) };
        match result {
            WAIT_OBJECT_0 => Ok(WaitResult::Signaled),
            WAIT_TIMEOUT => Ok(WaitResult::Timeout),
            _ => {
                let win_err = windows::core::Error::from_thread();
                Err(ShmError::windows_api_error("WaitForSingleObject(event)", win_err))
            }
        }
    }

    pub(super) fn flush(&self) -> Result<()> {
        unsafe { FlushViewOfFile(self.base.as_ptr() as *const c_void, self.size) }
            .map_err(|e| ShmError::windows_api_error("FlushViewOfFile", e))
    }
}

impl Drop for RegionBackend {
    fn drop(&mut self) {
        unsafe {
            let addr = MEMORY_MAPPED_VIEW_ADDRESS { Value: self.base.as_ptr() as *mut _ };
            let _ = UnmapViewOfFile(addr);
            let _ = CloseHandle(self.mapping);
            if !self.mutex.is_invalid() {
                let _ = CloseHandle(self.mutex);
            }
            if !self.event.is_invalid() {
                let _ = CloseHandle(self.event);
            }
        }
    }
}

// SAFETY: the handles are kernel objects usable from any thread and the view
// is only accessed through the region's lock or atomic loads. Mutex ownership
// is thread-bound, which RegionGuard enforces by being !Send.
unsafe impl Send for RegionBackend {}
unsafe impl Sync for RegionBackend {}

/// Convert string to null-terminated wide string for Windows APIs
fn wide_string(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(all(test, windows))]
mod tests {
    use super::*;
    use crate::region::SharedRegion;

    #[test]
    fn wide_string_is_nul_terminated() {
        let wide = wide_string("ab");
        assert_eq!(wide, vec![b'a' as u16, b'b' as u16, 0]);
    }

    #[test]
    fn mutex_is_shared_between_handles() {
        let config = RegionConfig::new(format!("overlay-shm-test-{}", std::process::id()));
        let a = SharedRegion::open(&config).unwrap();
        let b = SharedRegion::open(&config).unwrap();

        let guard = a.lock().unwrap();
        let contended = std::thread::spawn(move || b.try_lock().unwrap().is_none()).join().unwrap();
        assert!(contended);
        drop(guard);
    }
}
