//! Runtime settings for regions, caches and watchers.
//!
//! Settings are plain serde structs with every field defaulted, so an empty
//! YAML document (or no document at all) yields a working configuration.
//!
//! ```rust
//! use overlay_shm::ShmSettings;
//!
//! let settings = ShmSettings::from_yaml_str(
//!     "region:\n  app_id: com.example.overlay\ncache:\n  stale_window_ms: 250\n",
//! ).unwrap();
//! assert_eq!(settings.region.app_id, "com.example.overlay");
//! assert_eq!(settings.cache.stale_window().as_millis(), 250);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Result, ShmError};

/// Application id used when none is configured.
pub const DEFAULT_APP_ID: &str = "com.racedirector.overlay";

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShmSettings {
    pub region: RegionConfig,
    pub cache: CacheSettings,
    pub watcher: WatcherSettings,
}

/// Identity and placement of the shared region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// Prefix of every named object; feeder and consumers must agree on it.
    pub app_id: String,
    /// Directory holding the backing files on Unix. Ignored on Windows,
    /// where the objects live in the session namespace.
    pub directory: Option<PathBuf>,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self { app_id: DEFAULT_APP_ID.to_string(), directory: None }
    }
}

impl RegionConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self { app_id: app_id.into(), directory: None }
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// How long a cached snapshot may stand in for an unreadable region.
    pub stale_window_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { stale_window_ms: 100 }
    }
}

impl CacheSettings {
    pub fn stale_window(&self) -> Duration {
        Duration::from_millis(self.stale_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherSettings {
    /// Upper bound on a single wait for the readiness event.
    pub wait_timeout_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self { wait_timeout_ms: 500 }
    }
}

impl WatcherSettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl ShmSettings {
    /// Parse settings from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(yaml).map_err(|e| ShmError::config(None, e.to_string()))
    }

    /// Read and parse settings from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ShmError::io(format!("reading settings {}", path.display()), e))?;
        let settings = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(&yaml)
                .map_err(|e| ShmError::config(Some(path.to_path_buf()), e.to_string()))?
        };
        debug!(path = %path.display(), app_id = %settings.region.app_id, "Loaded shared region settings");
        Ok(settings)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| ShmError::config(None, e.to_string()))
    }
}
