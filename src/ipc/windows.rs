//! Handle duplication with `OpenProcess` + `DuplicateHandle`.

use std::io;
use windows::Win32::Foundation::{CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, HANDLE};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcess, PROCESS_DUP_HANDLE};

use super::{HandleDuplicator, NativeHandle};

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Duplicator;

fn to_handle(handle: NativeHandle) -> HANDLE {
    HANDLE(handle.raw() as usize as *mut std::ffi::c_void)
}

fn from_handle(handle: HANDLE) -> NativeHandle {
    NativeHandle::from_raw(handle.0 as usize as u64)
}

impl HandleDuplicator for Win32Duplicator {
    fn open_process(&self, process_id: u32) -> io::Result<NativeHandle> {
        let process = unsafe { OpenProcess(PROCESS_DUP_HANDLE, false, process_id) }?;
        Ok(from_handle(process))
    }

    fn duplicate(&self, process: NativeHandle, foreign: NativeHandle) -> io::Result<NativeHandle> {
        let mut local = HANDLE::default();
        unsafe {
            DuplicateHandle(
                to_handle(process),
                to_handle(foreign),
                GetCurrentProcess(),
                &mut local,
                0,
                false,
                DUPLICATE_SAME_ACCESS,
            )
        }?;
        Ok(from_handle(local))
    }

    fn close(&self, handle: NativeHandle) {
        unsafe {
            let _ = CloseHandle(to_handle(handle));
        }
    }
}
