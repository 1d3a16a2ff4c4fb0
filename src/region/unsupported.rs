//! Placeholder backend for targets without shared memory support.

use std::time::Duration;

use super::{LockOutcome, WaitResult};
use crate::config::RegionConfig;
use crate::{Result, ShmError};

pub(super) struct RegionBackend {
    _private: (),
}

impl RegionBackend {
    pub(super) fn open(_name: &str, _config: &RegionConfig, _size: usize) -> Result<Self> {
        Err(ShmError::unsupported_platform("Shared frame regions", "Windows or Unix"))
    }

    pub(super) fn base(&self) -> *mut u8 {
        std::ptr::null_mut()
    }

    pub(super) fn lock(&self) -> Result<LockOutcome> {
        Err(ShmError::unsupported_platform("Shared frame regions", "Windows or Unix"))
    }

    pub(super) fn try_lock(&self) -> Result<Option<LockOutcome>> {
        Err(ShmError::unsupported_platform("Shared frame regions", "Windows or Unix"))
    }

    pub(super) fn unlock(&self) {}

    pub(super) fn signal(&self) -> Result<()> {
        Err(ShmError::unsupported_platform("Shared frame regions", "Windows or Unix"))
    }

    pub(super) fn wait(&self, _timeout: Duration) -> Result<WaitResult> {
        Err(ShmError::unsupported_platform("Shared frame regions", "Windows or Unix"))
    }

    pub(super) fn flush(&self) -> Result<()> {
        Ok(())
    }
}
