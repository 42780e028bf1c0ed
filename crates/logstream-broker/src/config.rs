//! Broker Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// A client whose last heartbeat is older than this has its dispatch
    /// task retired (default: 90s; clients ping every 30s).
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// Flush the outgoing batch at this many messages (default: 1000).
    #[serde(default = "default_batch_max_messages")]
    pub batch_max_messages: usize,

    /// Flush the outgoing batch at this many buffered bytes (default: 1MB).
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: usize,

    /// Maximum wait before flushing a non-empty batch that has not hit a
    /// size threshold (default: 10ms).
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,

    /// Upper bound on a dispatch task's wait for a topic signal, so
    /// coalesced signals only ever delay delivery, never stall it
    /// (default: 5s).
    #[serde(default = "default_signal_wait_ms")]
    pub signal_wait_ms: u64,

    /// Whether PUB frames carry a 4-byte CRC32 trailer (default: true).
    #[serde(default = "default_publish_checksums")]
    pub publish_checksums: bool,

    /// Whether dispatch verifies stored checksums when reading records for
    /// delivery (default: false; corrupted records are skipped when on).
    #[serde(default)]
    pub verify_read_checksums: bool,

    /// Maximum inbound or outbound frame size (default: 1MB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl BrokerConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn signal_wait(&self) -> Duration {
        Duration::from_millis(self.signal_wait_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            batch_max_messages: default_batch_max_messages(),
            batch_max_bytes: default_batch_max_bytes(),
            linger_ms: default_linger_ms(),
            signal_wait_ms: default_signal_wait_ms(),
            publish_checksums: default_publish_checksums(),
            verify_read_checksums: false,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:1234".to_string()
}

fn default_liveness_timeout_ms() -> u64 {
    90_000
}

fn default_batch_max_messages() -> usize {
    1000
}

fn default_batch_max_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_linger_ms() -> u64 {
    10
}

fn default_signal_wait_ms() -> u64 {
    5000
}

fn default_publish_checksums() -> bool {
    true
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024 // 1MB
}
