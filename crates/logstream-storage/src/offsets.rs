//! Client Offset Store
//!
//! Committed offsets are kept in memory per client and checkpointed as
//! records in the reserved topic `__consumer_offset`, which lives in the
//! same log store as user topics and rides the same rollover and retention
//! machinery (self-hosting).
//!
//! Each checkpoint is one ASCII record:
//!
//! ```text
//! {timestamp_ms} {client_id} {topic} {offset}
//! ```
//!
//! There is no compaction: every update appends, and replay applies
//! last-write-wins. On startup the reserved topic is replayed from offset 0
//! with checksum verification disabled; malformed or expired records are
//! skipped via the read's returned next offset and never fail startup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::log::LogStore;

/// Reserved topic holding offset checkpoints.
pub const OFFSETS_TOPIC: &str = "__consumer_offset";

type TopicOffsets = HashMap<String, u64>;

pub struct OffsetStore {
    log: Arc<LogStore>,
    /// Per-client maps behind per-client locks; the outer map is only
    /// touched to add clients.
    clients: RwLock<HashMap<String, Arc<Mutex<TopicOffsets>>>>,
}

impl OffsetStore {
    /// Rebuild the store by replaying the reserved topic from offset 0.
    pub fn load(log: Arc<LogStore>) -> Self {
        let mut clients: HashMap<String, Arc<Mutex<TopicOffsets>>> = HashMap::new();
        let mut offset = 0u64;
        let mut records = 0usize;
        loop {
            let (msg, next) = match log.read_message(OFFSETS_TOPIC, offset, false) {
                Ok(read) => read,
                Err(e) => {
                    warn!(offset, error = %e, "offset replay stopped early");
                    break;
                }
            };
            if next <= offset {
                break;
            }
            // None with an advanced offset is expired or skipped data.
            if let Some(record) = msg {
                match parse_checkpoint(&record) {
                    Some((client, topic, committed)) => {
                        clients
                            .entry(client)
                            .or_default()
                            .lock()
                            .unwrap()
                            .insert(topic, committed);
                        records += 1;
                    }
                    None => debug!(offset, "skipping malformed offset checkpoint"),
                }
            }
            offset = next;
        }
        info!(
            clients = clients.len(),
            records, "offset store replayed"
        );
        Self {
            log,
            clients: RwLock::new(clients),
        }
    }

    /// Snapshot of the client's topic → committed-offset map, lazily
    /// creating the client's entry.
    pub fn topics(&self, client: &str) -> TopicOffsets {
        self.entry(client).lock().unwrap().clone()
    }

    /// The committed offset for one topic (0 if none).
    pub fn committed(&self, client: &str, topic: &str) -> u64 {
        self.entry(client)
            .lock()
            .unwrap()
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Whether the client already tracks this topic.
    pub fn is_subscribed(&self, client: &str, topic: &str) -> bool {
        self.entry(client).lock().unwrap().contains_key(topic)
    }

    /// Advance the committed offset after a successful delivery. Committed
    /// offsets only move forward; a stale commit is ignored.
    pub async fn commit(&self, client: &str, topic: &str, offset: u64) -> Result<()> {
        {
            let entry = self.entry(client);
            let mut offsets = entry.lock().unwrap();
            let current = offsets.get(topic).copied().unwrap_or(0);
            if offset <= current && offsets.contains_key(topic) {
                return Ok(());
            }
            offsets.insert(topic.to_string(), offset);
        }
        self.checkpoint(client, topic, offset).await
    }

    /// Overwrite the committed offset (explicit seek/reset).
    pub async fn reset(&self, client: &str, topic: &str, offset: u64) -> Result<()> {
        self.entry(client)
            .lock()
            .unwrap()
            .insert(topic.to_string(), offset);
        self.checkpoint(client, topic, offset).await
    }

    fn entry(&self, client: &str) -> Arc<Mutex<TopicOffsets>> {
        if let Some(entry) = self.clients.read().unwrap().get(client) {
            return entry.clone();
        }
        self.clients
            .write()
            .unwrap()
            .entry(client.to_string())
            .or_default()
            .clone()
    }

    async fn checkpoint(&self, client: &str, topic: &str, offset: u64) -> Result<()> {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let record = format!("{timestamp_ms} {client} {topic} {offset}");
        // No checksum on the internal topic; replay skips verification too.
        self.log.append(OFFSETS_TOPIC, record.as_bytes(), None).await?;
        Ok(())
    }
}

/// `{timestamp_ms} {client} {topic} {offset}` → `(client, topic, offset)`.
fn parse_checkpoint(record: &[u8]) -> Option<(String, String, u64)> {
    let text = std::str::from_utf8(record).ok()?;
    let mut parts = text.split(' ');
    let _timestamp: u128 = parts.next()?.parse().ok()?;
    let client = parts.next()?;
    let topic = parts.next()?;
    let offset: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || client.is_empty() || topic.is_empty() {
        return None;
    }
    Some((client.to_string(), topic.to_string(), offset))
}
