//! Storage Configuration
//!
//! Controls how topic logs are segmented, retained, and flushed:
//!
//! - **segment_max_bytes**: hard cap per segment; appends that would exceed
//!   it roll over to a new segment instead of growing further (default: 10MB)
//! - **segment_grow_bytes**: increment by which the active segment's file and
//!   mapping grow, and the initial size of a fresh segment (default: 1MB)
//! - **retention_ms**: maximum segment age before it becomes invisible to
//!   readers and eligible for deletion (default: 5 hours)
//! - **deletion_grace_ms**: extra delay between expiry and file removal
//!   (default: 5s)
//! - **cache_capacity**: number of sealed-segment mappings kept open
//!   (default: 1000)
//! - **sweep_interval_ms** / **flush_interval_ms**: cadence of the expiry
//!   sweep and the lazy flush of active segments

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one subdirectory per topic.
    pub log_dir: PathBuf,

    /// Maximum segment age in milliseconds (default: 5 hours)
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,

    /// Grace period between expiry and file deletion (default: 5s)
    #[serde(default = "default_deletion_grace_ms")]
    pub deletion_grace_ms: u64,

    /// Maximum segment size in bytes before rolling (default: 10MB)
    #[serde(default = "default_segment_max_bytes")]
    pub segment_max_bytes: u64,

    /// Growth increment and initial size for active segments (default: 1MB)
    #[serde(default = "default_segment_grow_bytes")]
    pub segment_grow_bytes: u64,

    /// Sealed-segment mappings kept open in the LRU cache (default: 1000)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Expiry sweep cadence (default: 1s)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Lazy flush cadence for active segments (default: 500ms)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl StorageConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Default::default()
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn deletion_grace(&self) -> Duration {
        Duration::from_millis(self.deletion_grace_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./data/logs"),
            retention_ms: default_retention_ms(),
            deletion_grace_ms: default_deletion_grace_ms(),
            segment_max_bytes: default_segment_max_bytes(),
            segment_grow_bytes: default_segment_grow_bytes(),
            cache_capacity: default_cache_capacity(),
            sweep_interval_ms: default_sweep_interval_ms(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_retention_ms() -> u64 {
    5 * 60 * 60 * 1000 // 5 hours
}

fn default_deletion_grace_ms() -> u64 {
    5000
}

fn default_segment_max_bytes() -> u64 {
    10 * 1024 * 1024 // 10MB
}

fn default_segment_grow_bytes() -> u64 {
    1024 * 1024 // 1MB
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_flush_interval_ms() -> u64 {
    500
}
