//! Handle duplication through pidfds (Linux 5.6+).

use std::io;

use super::{HandleDuplicator, NativeHandle};

/// Duplicates file descriptors out of another process with
/// `pidfd_open` + `pidfd_getfd`. Needs ptrace access to the feeder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PidfdDuplicator;

impl HandleDuplicator for PidfdDuplicator {
    fn open_process(&self, process_id: u32) -> io::Result<NativeHandle> {
        // SAFETY: plain syscall, no pointers.
        let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, process_id as libc::pid_t, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(NativeHandle::from_raw(fd as u64))
    }

    fn duplicate(&self, process: NativeHandle, foreign: NativeHandle) -> io::Result<NativeHandle> {
        // SAFETY: plain syscall, no pointers.
        let fd = unsafe {
            libc::syscall(
                libc::SYS_pidfd_getfd,
                process.raw() as libc::c_int,
                foreign.raw() as libc::c_int,
                0,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(NativeHandle::from_raw(fd as u64))
    }

    fn close(&self, handle: NativeHandle) {
        // SAFETY: we own the descriptor.
        unsafe { libc::close(handle.raw() as libc::c_int) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn unavailable(err: &io::Error) -> bool {
        matches!(err.raw_os_error(), Some(libc::ENOSYS) | Some(libc::EPERM))
    }

    #[test]
    fn duplicates_own_descriptor() {
        let duplicator = PidfdDuplicator;
        let pidfd = match duplicator.open_process(std::process::id()) {
            Ok(fd) => fd,
            Err(e) if unavailable(&e) => return,
            Err(e) => panic!("pidfd_open failed: {e}"),
        };

        let file = tempfile::tempfile().unwrap();
        let foreign = NativeHandle::from_raw(file.as_raw_fd() as u64);
        let local = match duplicator.duplicate(pidfd, foreign) {
            Ok(fd) => fd,
            Err(e) if unavailable(&e) => {
                duplicator.close(pidfd);
                return;
            }
            Err(e) => panic!("pidfd_getfd failed: {e}"),
        };
        assert_ne!(local, foreign);

        // Same open file description: identical inode.
        let mut a: libc::stat = unsafe { std::mem::zeroed() };
        let mut b: libc::stat = unsafe { std::mem::zeroed() };
        unsafe {
            assert_eq!(libc::fstat(foreign.raw() as libc::c_int, &mut a), 0);
            assert_eq!(libc::fstat(local.raw() as libc::c_int, &mut b), 0);
        }
        assert_eq!(a.st_ino, b.st_ino);

        duplicator.close(local);
        duplicator.close(pidfd);
    }

    #[test]
    fn missing_process_fails() {
        // Pid numbers wrap well below this on Linux.
        let err = PidfdDuplicator.open_process(0x7FFF_FFF0).unwrap_err();
        assert!(err.raw_os_error().is_some());
    }
}
