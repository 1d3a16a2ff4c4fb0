//! Error types for shared frame exchange.
//!
//! Only operational failures surface as [`ShmError`]. Contract violations by the
//! caller (indexing past the overlay count, asking a snapshot for a texture it
//! does not carry, polling an uninitialized cache) panic instead, and transient
//! conditions (lock contention, adapter mismatch, an empty region) are reported
//! through snapshot states or `Option`/`bool` returns.
//!
//! ## Error Categories
//!
//! - **Region Errors**: Creating or mapping the named shared region failed
//! - **Lock Errors**: The OS rejected a mutex operation for a reason other than abandonment
//! - **Handle Errors**: Opening the feeder process or duplicating its GPU handles failed
//! - **Texture Errors**: The graphics backend could not create or fill a client texture
//! - **Config Errors**: Settings could not be read or parsed
//! - **Windows API Errors**: Platform-specific Windows operation failures
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use overlay_shm::ShmError;
//!
//! let error = ShmError::region_failed("Local/overlay", "mapping refused");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::ipc::NativeHandle;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for shared frame exchange operations.
pub type Result<T, E = ShmError> = std::result::Result<T, E>;

/// Main error type for shared frame exchange operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ShmError {
    #[error("Failed to open shared region '{name}': {reason}")]
    Region {
        name: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Shared region lock operation '{operation}' failed")]
    Lock {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open feeder process {process_id} for handle duplication")]
    ProcessOpen {
        process_id: u32,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to duplicate handle {handle} from feeder process {process_id}")]
    HandleDuplication {
        process_id: u32,
        handle: NativeHandle,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Texture copy failed: {reason}")]
    TextureCopy {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Client texture creation failed for swapchain slot {swapchain_index}: {reason}")]
    TextureCreation { swapchain_index: u8, reason: String },

    #[error("Configuration error in {}: {details}", path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<inline>".to_string()))]
    Config { path: Option<PathBuf>, details: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("I/O error while {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame watcher failure: {context}")]
    Watcher { context: String },

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },
}

impl ShmError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ShmError::Region { .. } => true,
            ShmError::Lock { .. } => false,
            ShmError::ProcessOpen { .. } => true,
            ShmError::HandleDuplication { .. } => true,
            ShmError::TextureCopy { .. } => false,
            ShmError::TextureCreation { .. } => false,
            ShmError::Config { .. } => false,
            ShmError::Timeout { .. } => true,
            ShmError::UnsupportedPlatform { .. } => false,
            ShmError::Io { .. } => true,
            ShmError::Watcher { .. } => false,
            #[cfg(windows)]
            ShmError::WindowsApi { .. } => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ShmError::Region { .. } => vec![
                "Check that the region directory exists and is writable",
                "Verify feeder and consumers agree on the application id",
                "Make sure both sides were built against the same frame layout",
            ],
            ShmError::Lock { .. } => vec![
                "Recreate the shared region handle",
                "Check for processes holding a corrupted region mutex",
            ],
            ShmError::ProcessOpen { .. } => vec![
                "Verify the feeder process is still running",
                "Check that the consumer may open the feeder process for handle duplication",
                "Run feeder and consumer under the same user",
            ],
            ShmError::HandleDuplication { .. } => vec![
                "Wait for the next frame; the feeder may have restarted",
                "Check handle duplication permissions between the processes",
            ],
            ShmError::TextureCopy { .. } => vec![
                "Recreate the graphics device and reinitialize the cache",
                "Verify feeder and consumer use the same GPU adapter",
            ],
            ShmError::TextureCreation { .. } => vec![
                "Check available GPU memory",
                "Verify the requested texture size is supported by the device",
            ],
            ShmError::Config { .. } => vec![
                "Check the settings file syntax",
                "Remove unknown keys; every setting has a default",
            ],
            ShmError::Timeout { .. } => vec![
                "Increase the wait timeout",
                "Verify the feeder is still producing frames",
            ],
            ShmError::UnsupportedPlatform { .. } => vec![
                "Use a platform with a shared region backend",
                "Check documentation for platform requirements",
            ],
            ShmError::Io { .. } => vec![
                "Check file permissions of the region directory",
                "Ensure sufficient space in the shared memory filesystem",
            ],
            ShmError::Watcher { .. } => vec![
                "Restart the frame watcher",
                "Check the tokio runtime is still running",
            ],
            #[cfg(windows)]
            ShmError::WindowsApi { .. } => vec![
                "Check Windows API permissions",
                "Verify system resources availability",
                "Check Windows version compatibility",
            ],
        }
    }

    /// Helper constructor for region errors.
    pub fn region_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ShmError::Region { name: name.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for region errors with source.
    pub fn region_failed_with_source(
        name: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        ShmError::Region { name: name.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for lock errors carrying an OS error code.
    pub fn lock_failed(operation: &'static str, source: std::io::Error) -> Self {
        ShmError::Lock { operation, source }
    }

    /// Helper constructor for texture copy errors.
    pub fn texture_copy_failed(reason: impl Into<String>) -> Self {
        ShmError::TextureCopy { reason: reason.into(), source: None }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ShmError::Io { context: context.into(), source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(path: Option<PathBuf>, details: impl Into<String>) -> Self {
        ShmError::Config { path, details: details.into() }
    }

    /// Helper constructor for Windows API errors.
    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        ShmError::WindowsApi { operation: operation.into(), source }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        ShmError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }
}

impl From<std::io::Error> for ShmError {
    fn from(err: std::io::Error) -> Self {
        ShmError::Io { context: "unknown operation".to_string(), source: err }
    }
}

#[cfg(windows)]
impl From<core::Error> for ShmError {
    fn from(err: core::Error) -> Self {
        ShmError::WindowsApi { operation: "Unknown Windows operation".to_string(), source: err }
    }
}
