//! File-backed region for Unix.
//!
//! Each named object is a small file under the region directory mapped with
//! `memmap2`. The mutex and the readiness event are process-shared pthread
//! objects living inside their own files; the first process to map a file
//! initializes the object and publishes that through a state word.

use memmap2::{MmapOptions, MmapRaw};
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::{MaybeUninit, size_of};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{LockOutcome, WaitResult};
use crate::config::RegionConfig;
use crate::{Result, ShmError};

const UNINITIALIZED: u32 = 0;
const INITIALIZING: u32 = 1;
const READY: u32 = 2;

/// How long to wait for another process to finish initializing an object.
const INIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest single wait; keeps the deadline arithmetic far from overflow.
const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[cfg(target_os = "linux")]
const EVENT_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(target_os = "linux"))]
const EVENT_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

#[repr(C)]
struct SharedMutex {
    state: AtomicU32,
    mutex: libc::pthread_mutex_t,
}

#[repr(C)]
struct SharedEvent {
    state: AtomicU32,
    /// Bumped on every signal; waiters wake when it moves.
    generation: AtomicU64,
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
}

struct MappedFile {
    path: PathBuf,
    _file: File,
    map: MmapRaw,
}

impl MappedFile {
    fn open(path: PathBuf, len: usize, region: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(&path)
            .map_err(|e| {
                ShmError::region_failed_with_source(
                    region,
                    format!("cannot open {}", path.display()),
                    Box::new(e),
                )
            })?;

        let current = file
            .metadata()
            .map_err(|e| ShmError::io(format!("inspecting {}", path.display()), e))?
            .len();
        if current < len as u64 {
            file.set_len(len as u64)
                .map_err(|e| ShmError::io(format!("sizing {}", path.display()), e))?;
        }

        let map = MmapOptions::new().len(len).map_raw(&file).map_err(|e| {
            ShmError::region_failed_with_source(
                region,
                format!("cannot map {}", path.display()),
                Box::new(e),
            )
        })?;

        Ok(Self { path, _file: file, map })
    }

    fn ptr<T>(&self) -> *mut T {
        self.map.as_mut_ptr().cast()
    }
}

pub(super) struct RegionBackend {
    record: MappedFile,
    mutex: MappedFile,
    event: MappedFile,
}

impl RegionBackend {
    pub(super) fn open(name: &str, config: &RegionConfig, size: usize) -> Result<Self> {
        let directory = config.directory.clone().unwrap_or_else(default_directory);
        let stem = file_stem(name);

        let record = MappedFile::open(directory.join(&stem), size, name)?;
        let mutex =
            MappedFile::open(directory.join(format!("{stem}.mutex")), size_of::<SharedMutex>(), name)?;
        let event =
            MappedFile::open(directory.join(format!("{stem}.event")), size_of::<SharedEvent>(), name)?;

        let backend = Self { record, mutex, event };
        backend.init_objects(name)?;

        debug!(
            record = %backend.record.path.display(),
            mutex = %backend.mutex.path.display(),
            event = %backend.event.path.display(),
            "Mapped region files"
        );
        Ok(backend)
    }

    fn init_objects(&self, name: &str) -> Result<()> {
        let mutex = self.shared_mutex();
        // SAFETY: the mapping is live and sized for SharedMutex.
        let state = unsafe { &(*mutex).state };
        init_once(state, name, || unsafe { init_mutex(&raw mut (*mutex).mutex) })?;

        let event = self.shared_event();
        // SAFETY: the mapping is live and sized for SharedEvent.
        let state = unsafe { &(*event).state };
        init_once(state, name, || unsafe {
            init_mutex(&raw mut (*event).mutex)?;
            init_cond(&raw mut (*event).cond)
        })
    }

    pub(super) fn base(&self) -> *mut u8 {
        self.record.ptr()
    }

    fn shared_mutex(&self) -> *mut SharedMutex {
        self.mutex.ptr()
    }

    fn shared_event(&self) -> *mut SharedEvent {
        self.event.ptr()
    }

    fn raw_mutex(&self) -> *mut libc::pthread_mutex_t {
        // SAFETY: projecting a field of the live mapping.
        unsafe { &raw mut (*self.shared_mutex()).mutex }
    }

    pub(super) fn lock(&self) -> Result<LockOutcome> {
        let mutex = self.raw_mutex();
        // SAFETY: initialized process-shared mutex in a live mapping.
        let rc = unsafe { libc::pthread_mutex_lock(mutex) };
        lock_outcome("pthread_mutex_lock", mutex, rc)
    }

    pub(super) fn try_lock(&self) -> Result<Option<LockOutcome>> {
        let mutex = self.raw_mutex();
        // SAFETY: as in `lock`.
        let rc = unsafe { libc::pthread_mutex_trylock(mutex) };
        if rc == libc::EBUSY {
            return Ok(None);
        }
        lock_outcome("pthread_mutex_trylock", mutex, rc).map(Some)
    }

    pub(super) fn unlock(&self) {
        // SAFETY: only called by a guard that holds the mutex.
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw_mutex()) };
        if rc != 0 {
            warn!(error = %io::Error::from_raw_os_error(rc), "pthread_mutex_unlock failed");
        }
    }

    pub(super) fn signal(&self) -> Result<()> {
        let event = self.shared_event();
        // SAFETY: initialized event objects in a live mapping.
        unsafe {
            let mutex = &raw mut (*event).mutex;
            let rc = libc::pthread_mutex_lock(mutex);
            lock_outcome("pthread_mutex_lock", mutex, rc)?;
            (*event).generation.fetch_add(1, Ordering::AcqRel);
            let rc = libc::pthread_cond_broadcast(&raw mut (*event).cond);
            libc::pthread_mutex_unlock(mutex);
            if rc != 0 {
                return Err(ShmError::lock_failed(
                    "pthread_cond_broadcast",
                    io::Error::from_raw_os_error(rc),
                ));
            }
        }
        Ok(())
    }

    pub(super) fn wait(&self, timeout: Duration) -> Result<WaitResult> {
        let event = self.shared_event();
        let deadline = deadline_after(timeout.min(MAX_WAIT));
        // SAFETY: initialized event objects in a live mapping.
        unsafe {
            let mutex = &raw mut (*event).mutex;
            let cond = &raw mut (*event).cond;
            let rc = libc::pthread_mutex_lock(mutex);
            lock_outcome("pthread_mutex_lock", mutex, rc)?;

            let start = (*event).generation.load(Ordering::Acquire);
            let result = loop {
                if (*event).generation.load(Ordering::Acquire) != start {
                    break Ok(WaitResult::Signaled);
                }
                let rc = libc::pthread_cond_timedwait(cond, mutex, &deadline);
                match rc {
                    0 => continue,
                    libc::ETIMEDOUT => {
                        let moved = (*event).generation.load(Ordering::Acquire) != start;
                        break Ok(if moved { WaitResult::Signaled } else { WaitResult::Timeout });
                    }
                    rc => match lock_outcome("pthread_cond_timedwait", mutex, rc) {
                        Ok(_) => continue,
                        Err(e) => break Err(e),
                    },
                }
            };
            libc::pthread_mutex_unlock(mutex);
            result
        }
    }

    pub(super) fn flush(&self) -> Result<()> {
        self.record
            .map
            .flush()
            .map_err(|e| ShmError::io(format!("flushing {}", self.record.path.display()), e))
    }
}

/// `/dev/shm` where it exists, the temp dir elsewhere.
fn default_directory() -> PathBuf {
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() { dev_shm.to_path_buf() } else { std::env::temp_dir() }
}

fn file_stem(name: &str) -> String {
    name.replace(['/', '\\'], ".")
}

fn init_once(
    state: &AtomicU32,
    name: &str,
    init: impl FnOnce() -> io::Result<()>,
) -> Result<()> {
    match state.compare_exchange(UNINITIALIZED, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => match init() {
            Ok(()) => {
                state.store(READY, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                state.store(UNINITIALIZED, Ordering::Release);
                Err(ShmError::region_failed_with_source(
                    name,
                    "cannot initialize process-shared object",
                    Box::new(e),
                ))
            }
        },
        Err(_) => {
            let give_up = Instant::now() + INIT_TIMEOUT;
            while state.load(Ordering::Acquire) != READY {
                if Instant::now() >= give_up {
                    return Err(ShmError::region_failed(
                        name,
                        "another process never finished initializing the region",
                    ));
                }
                std::thread::yield_now();
            }
            Ok(())
        }
    }
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 { Ok(()) } else { Err(io::Error::from_raw_os_error(rc)) }
}

/// # Safety
/// `mutex` must point into a live writable mapping that no one else uses yet.
unsafe fn init_mutex(mutex: *mut libc::pthread_mutex_t) -> io::Result<()> {
    let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    unsafe {
        check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
        let configured = check(libc::pthread_mutexattr_setpshared(
            attr.as_mut_ptr(),
            libc::PTHREAD_PROCESS_SHARED,
        ))
        .and_then(|()| set_robust(attr.as_mut_ptr()))
        .and_then(|()| check(libc::pthread_mutex_init(mutex, attr.as_ptr())));
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        configured
    }
}

#[cfg(target_os = "linux")]
unsafe fn set_robust(attr: *mut libc::pthread_mutexattr_t) -> io::Result<()> {
    check(unsafe { libc::pthread_mutexattr_setrobust(attr, libc::PTHREAD_MUTEX_ROBUST) })
}

#[cfg(not(target_os = "linux"))]
unsafe fn set_robust(_attr: *mut libc::pthread_mutexattr_t) -> io::Result<()> {
    Ok(())
}

/// # Safety
/// `cond` must point into a live writable mapping that no one else uses yet.
unsafe fn init_cond(cond: *mut libc::pthread_cond_t) -> io::Result<()> {
    let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
    unsafe {
        check(libc::pthread_condattr_init(attr.as_mut_ptr()))?;
        let configured = check(libc::pthread_condattr_setpshared(
            attr.as_mut_ptr(),
            libc::PTHREAD_PROCESS_SHARED,
        ))
        .and_then(|()| set_clock(attr.as_mut_ptr()))
        .and_then(|()| check(libc::pthread_cond_init(cond, attr.as_ptr())));
        libc::pthread_condattr_destroy(attr.as_mut_ptr());
        configured
    }
}

#[cfg(target_os = "linux")]
unsafe fn set_clock(attr: *mut libc::pthread_condattr_t) -> io::Result<()> {
    check(unsafe { libc::pthread_condattr_setclock(attr, EVENT_CLOCK) })
}

#[cfg(not(target_os = "linux"))]
unsafe fn set_clock(_attr: *mut libc::pthread_condattr_t) -> io::Result<()> {
    Ok(())
}

/// Map a pthread lock return code, repairing owner-dead robust mutexes.
fn lock_outcome(
    operation: &'static str,
    mutex: *mut libc::pthread_mutex_t,
    rc: libc::c_int,
) -> Result<LockOutcome> {
    match rc {
        0 => Ok(LockOutcome::Acquired),
        #[cfg(target_os = "linux")]
        libc::EOWNERDEAD => {
            // SAFETY: we now own the mutex; marking it consistent keeps it usable.
            unsafe { libc::pthread_mutex_consistent(mutex) };
            Ok(LockOutcome::Abandoned)
        }
        rc => {
            let _ = mutex;
            Err(ShmError::lock_failed(operation, io::Error::from_raw_os_error(rc)))
        }
    }
}

fn deadline_after(timeout: Duration) -> libc::timespec {
    // SAFETY: timespec is plain data; clock_gettime fills it.
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(EVENT_CLOCK, &mut now) };

    let mut secs = now.tv_sec as i64 + timeout.as_secs() as i64;
    let mut nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }

    let mut deadline: libc::timespec = unsafe { std::mem::zeroed() };
    deadline.tv_sec = secs as _;
    deadline.tv_nsec = nanos as _;
    deadline
}
