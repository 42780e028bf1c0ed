//! Topic Log Store
//!
//! Owns, per topic, an ordered list of segments and the append, read,
//! rollover, and expiry machinery over them.
//!
//! ## Write path
//!
//! ```text
//! append(topic, payload, checksum)
//!     ↓ validate (empty payload, checksum length, CRC)
//!     ↓ per-topic writer lock
//! age ≥ retention?  ──YES──→ rollover (seal, open new)
//!     ↓
//! fits in mapping?  ──NO───→ grow by increments up to segment_max_bytes,
//!     ↓                      else rollover named by the global write offset
//! write [len][payload][trailer], advance write offset, pulse topic signal
//! ```
//!
//! ## Read path
//!
//! Readers take a snapshot of the topic's segment list (an `Arc<Vec<_>>`
//! swapped wholesale by rollover and expiry), binary-search the segment
//! containing the offset, and read through either the active segment's
//! published view or a cached sealed mapping. No locks are held while
//! reading bytes.
//!
//! Global offsets are byte addresses: the offset of a record is the file
//! position of its length prefix plus the segment's start offset, so offsets
//! strictly increase across the topic's entire segment history and are never
//! reused.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use logstream_core::{record, RecordView, CHECKSUM_LEN};

use crate::cache::SegmentCache;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::segment::{
    file_created_at, parse_start_offset, ActiveSegment, SealedMapping, SealedSegment, SegmentView,
};

/// One entry in a topic's segment list. The last entry is always the active
/// segment; everything before it is sealed.
#[derive(Clone)]
pub(crate) enum LogSegment {
    Sealed(Arc<SealedSegment>),
    Active(Arc<SegmentView>),
}

impl LogSegment {
    fn start_offset(&self) -> u64 {
        match self {
            LogSegment::Sealed(s) => s.start_offset,
            LogSegment::Active(v) => v.start_offset(),
        }
    }

    fn created_at(&self) -> SystemTime {
        match self {
            LogSegment::Sealed(s) => s.created_at,
            LogSegment::Active(v) => v.created_at(),
        }
    }
}

pub(crate) struct TopicLog {
    name: String,
    dir: PathBuf,
    /// Replaced wholesale under the write lock; readers clone the Arc.
    segments: RwLock<Arc<Vec<LogSegment>>>,
    /// Serializes append, growth, and rollover for this topic.
    writer: Mutex<ActiveSegment>,
    /// Pulsed on every successful append.
    signal: Arc<Notify>,
}

impl TopicLog {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<LogSegment>> {
        self.segments.read().unwrap().clone()
    }

    /// Replace the active (last) entry, after growth republished the view.
    fn publish_active(&self, view: Arc<SegmentView>) {
        let mut guard = self.segments.write().unwrap();
        let mut list: Vec<LogSegment> = guard.iter().cloned().collect();
        if let Some(last) = list.last_mut() {
            *last = LogSegment::Active(view);
        }
        *guard = Arc::new(list);
    }
}

pub struct LogStore {
    config: StorageConfig,
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    cache: SegmentCache,
}

impl LogStore {
    /// Open the store, loading every topic found under the log directory.
    /// All but the newest segment of each topic are sealed; the newest is
    /// mapped as active with its write offset recovered from the data.
    pub fn open(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.log_dir)?;
        let mut topics = HashMap::new();
        for entry in std::fs::read_dir(&config.log_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match load_topic(entry.path(), &name) {
                Ok(Some(topic)) => {
                    topics.insert(name, Arc::new(topic));
                }
                Ok(None) => {}
                Err(e) => warn!(topic = %name, error = %e, "failed to load topic, skipping"),
            }
        }
        info!(
            topics = topics.len(),
            dir = %config.log_dir.display(),
            "log store opened"
        );
        Ok(Self {
            cache: SegmentCache::new(config.cache_capacity),
            topics: RwLock::new(topics),
            config,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.read().unwrap().keys().cloned().collect()
    }

    /// Create the topic (directory plus initial segment) if it does not
    /// exist yet. Also establishes its signal.
    pub fn create_topic(&self, name: &str) -> Result<()> {
        self.ensure_topic(name).map(|_| ())
    }

    /// The topic's append signal, if the topic exists.
    pub fn signal(&self, topic: &str) -> Option<Arc<Notify>> {
        self.get_topic(topic).map(|t| t.signal.clone())
    }

    /// Append one record. Validation failures reject with no mutation.
    /// Returns the record's starting global offset.
    pub async fn append(
        &self,
        topic: &str,
        payload: &[u8],
        checksum: Option<&[u8]>,
    ) -> Result<u64> {
        record::validate_publish(payload, checksum)?;
        let body_len = payload.len() + checksum.map_or(0, <[u8]>::len);
        let rec_len = record::encoded_len(body_len) as u64;
        if rec_len > self.config.segment_max_bytes {
            return Err(Error::RecordTooLarge {
                size: rec_len,
                max: self.config.segment_max_bytes,
            });
        }

        let topic = self.ensure_topic(topic)?;
        let mut writer = topic.writer.lock().await;

        // Never write into a segment past its retention age. Skipped for a
        // still-empty segment, which would roll over onto its own file name.
        if writer.write_offset() > writer.start_offset()
            && age(writer.created_at()) >= self.config.retention()
        {
            self.rollover_locked(&topic, &mut writer)?;
        }

        loop {
            let file_pos = writer.write_offset() - writer.start_offset();
            if file_pos + rec_len <= writer.capacity() {
                break;
            }
            if writer.capacity() < self.config.segment_max_bytes {
                let grow = self
                    .config
                    .segment_grow_bytes
                    .min(self.config.segment_max_bytes - writer.capacity());
                let view = writer.grow(grow)?;
                topic.publish_active(view);
            } else {
                self.rollover_locked(&topic, &mut writer)?;
            }
        }

        let start = writer.write_record(payload, checksum);
        drop(writer);
        topic.signal.notify_waiters();
        Ok(start)
    }

    /// Read the record at `offset`, returning `(payload, next_offset)`.
    ///
    /// - `(None, offset)`: nothing there yet, caller should wait.
    /// - `(None, oldest)`: the offset fell into expired data; the caller is
    ///   fast-forwarded instead of erroring.
    /// - `(None, offset + len)`: the record failed verification and was
    ///   skipped.
    pub fn read_message(
        &self,
        topic: &str,
        offset: u64,
        verify_checksum: bool,
    ) -> Result<(Option<Bytes>, u64)> {
        let Some(topic) = self.get_topic(topic) else {
            return Ok((None, offset));
        };
        let segments = topic.snapshot();
        let Some(LogSegment::Active(active)) = segments.last() else {
            return Ok((None, offset));
        };
        if offset >= active.write_offset() {
            return Ok((None, offset));
        }

        let now = SystemTime::now();
        let retention = self.config.retention();
        let idx = segments.partition_point(|s| s.start_offset() <= offset);
        if idx == 0 {
            // Predates the oldest surviving segment.
            return Ok((None, oldest_offset_in(&segments, now, retention)));
        }
        let segment = &segments[idx - 1];
        if is_expired(segment.created_at(), now, retention) {
            return Ok((None, oldest_offset_in(&segments, now, retention)));
        }

        match segment {
            LogSegment::Active(view) => Ok(read_at(
                view.data(),
                view.start_offset(),
                offset,
                verify_checksum,
            )),
            LogSegment::Sealed(meta) => {
                let mapping = self.sealed_mapping(meta)?;
                Ok(read_at(
                    mapping.data(),
                    meta.start_offset,
                    offset,
                    verify_checksum,
                ))
            }
        }
    }

    /// The topic's current write offset (the next offset to be assigned).
    pub fn latest_offset(&self, topic: &str) -> u64 {
        let Some(topic) = self.get_topic(topic) else {
            return 0;
        };
        let segments = topic.snapshot();
        match segments.last() {
            Some(LogSegment::Active(view)) => view.write_offset(),
            _ => 0,
        }
    }

    /// Start offset of the oldest non-expired segment.
    pub fn oldest_offset(&self, topic: &str) -> u64 {
        let Some(topic) = self.get_topic(topic) else {
            return 0;
        };
        let segments = topic.snapshot();
        if segments.is_empty() {
            return 0;
        }
        oldest_offset_in(&segments, SystemTime::now(), self.config.retention())
    }

    /// Whether a record exists at `offset`.
    pub fn is_available(&self, topic: &str, offset: u64) -> bool {
        offset < self.latest_offset(topic)
    }

    /// Flush every topic's active segment; used on shutdown.
    pub async fn flush_all(&self) {
        for topic in self.topics_snapshot() {
            let writer = topic.writer.lock().await;
            if let Err(e) = writer.flush() {
                warn!(topic = topic.name(), error = %e, "flush failed");
            }
        }
    }

    fn get_topic(&self, name: &str) -> Option<Arc<TopicLog>> {
        self.topics.read().unwrap().get(name).cloned()
    }

    pub(crate) fn ensure_topic(&self, name: &str) -> Result<Arc<TopicLog>> {
        if let Some(topic) = self.get_topic(name) {
            return Ok(topic);
        }
        validate_topic_name(name)?;
        let mut topics = self.topics.write().unwrap();
        if let Some(topic) = topics.get(name) {
            return Ok(topic.clone());
        }
        let dir = self.config.log_dir.join(name);
        std::fs::create_dir_all(&dir)?;
        let active = ActiveSegment::create(&dir, 0, self.config.segment_grow_bytes)?;
        let topic = Arc::new(TopicLog {
            name: name.to_string(),
            dir,
            segments: RwLock::new(Arc::new(vec![LogSegment::Active(active.view())])),
            writer: Mutex::new(active),
            signal: Arc::new(Notify::new()),
        });
        topics.insert(name.to_string(), topic.clone());
        info!(topic = name, "created topic");
        Ok(topic)
    }

    pub(crate) fn topics_snapshot(&self) -> Vec<Arc<TopicLog>> {
        self.topics.read().unwrap().values().cloned().collect()
    }

    /// Drop every topic's fully-expired sealed prefix, returning the dropped
    /// segments as `(path, delete_at)` pairs for the deletion queue. The
    /// list swap is optimistic: a topic whose list changed since it was
    /// observed is left for the next sweep.
    pub(crate) fn sweep_expired(&self, now: SystemTime) -> Vec<(PathBuf, SystemTime)> {
        let retention = self.config.retention();
        let grace = self.config.deletion_grace();
        let mut dropped = Vec::new();
        for topic in self.topics_snapshot() {
            let snapshot = topic.snapshot();
            if snapshot.len() <= 1 {
                continue;
            }
            let sealed = &snapshot[..snapshot.len() - 1];
            let expired = sealed.partition_point(|s| is_expired(s.created_at(), now, retention));
            if expired == 0 {
                continue;
            }
            {
                let mut guard = topic.segments.write().unwrap();
                if !Arc::ptr_eq(&guard, &snapshot) {
                    // A concurrent rollover replaced the list; retry next tick.
                    continue;
                }
                *guard = Arc::new(snapshot[expired..].to_vec());
            }
            for segment in &snapshot[..expired] {
                if let LogSegment::Sealed(meta) = segment {
                    dropped.push((meta.path.clone(), meta.created_at + retention + grace));
                }
            }
            debug!(topic = topic.name(), count = expired, "expired segments");
        }
        dropped
    }

    /// Force cache eviction and delete the segment file.
    pub(crate) fn purge_segment(&self, path: &Path) -> std::io::Result<()> {
        self.cache.remove(path);
        std::fs::remove_file(path)
    }

    /// Flush active segments, skipping any topic whose writer is busy (a
    /// concurrent append or rollover; the next tick catches it).
    pub(crate) fn flush_active_segments(&self) {
        for topic in self.topics_snapshot() {
            let Ok(writer) = topic.writer.try_lock() else {
                continue;
            };
            if let Err(e) = writer.flush() {
                warn!(topic = topic.name(), error = %e, "lazy flush failed");
            }
        }
    }

    fn rollover_locked(&self, topic: &TopicLog, writer: &mut ActiveSegment) -> Result<()> {
        let next_start = writer.write_offset();
        let new_active = ActiveSegment::create(&topic.dir, next_start, self.config.segment_grow_bytes)?;
        let old = std::mem::replace(writer, new_active);
        let sealed = Arc::new(old.seal());

        let mut guard = topic.segments.write().unwrap();
        let mut list: Vec<LogSegment> = guard.iter().cloned().collect();
        if let Some(last) = list.last_mut() {
            *last = LogSegment::Sealed(sealed);
        }
        list.push(LogSegment::Active(writer.view()));
        *guard = Arc::new(list);
        debug!(topic = topic.name(), start = next_start, "rolled over segment");
        Ok(())
    }

    fn sealed_mapping(&self, meta: &SealedSegment) -> Result<Arc<SealedMapping>> {
        if let Some(mapping) = self.cache.get(&meta.path) {
            return Ok(mapping);
        }
        let mapping = Arc::new(SealedMapping::open(&meta.path)?);
        self.cache.put(meta.path.clone(), mapping.clone());
        Ok(mapping)
    }
}

fn load_topic(dir: PathBuf, name: &str) -> Result<Option<TopicLog>> {
    let mut files: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if let Some(start) = parse_start_offset(&path) {
            files.push((start, path));
        }
    }
    if files.is_empty() {
        return Ok(None);
    }
    files.sort_unstable_by_key(|(start, _)| *start);

    let (active_start, active_path) = files.pop().unwrap();
    let mut list = Vec::with_capacity(files.len() + 1);
    for (start, path) in files {
        let meta = std::fs::metadata(&path)?;
        list.push(LogSegment::Sealed(Arc::new(SealedSegment {
            created_at: file_created_at(&meta),
            len: meta.len(),
            start_offset: start,
            path,
        })));
    }
    let active = ActiveSegment::open(active_path, active_start)?;
    debug!(
        topic = name,
        segments = list.len() + 1,
        write_offset = active.write_offset(),
        "loaded topic"
    );
    list.push(LogSegment::Active(active.view()));
    Ok(Some(TopicLog {
        name: name.to_string(),
        dir,
        segments: RwLock::new(Arc::new(list)),
        writer: Mutex::new(active),
        signal: Arc::new(Notify::new()),
    }))
}

fn read_at(data: &[u8], seg_start: u64, offset: u64, verify: bool) -> (Option<Bytes>, u64) {
    let pos = (offset - seg_start) as usize;
    match RecordView::parse(data, pos) {
        // Nothing written here yet, or the captured view predates a growth
        // that this offset lives in: wait and retry, never skip ahead.
        RecordView::Empty | RecordView::OutOfBounds => (None, offset),
        RecordView::Record { body } => {
            let next = offset + record::encoded_len(body.len()) as u64;
            if !verify {
                return (Some(Bytes::copy_from_slice(body)), next);
            }
            if body.len() <= CHECKSUM_LEN {
                warn!(offset, "record too short to carry a checksum, skipping");
                return (None, next);
            }
            let (payload, trailer) = body.split_at(body.len() - CHECKSUM_LEN);
            if !record::checksum_matches(payload, trailer) {
                warn!(offset, "checksum mismatch on read, skipping record");
                return (None, next);
            }
            (Some(Bytes::copy_from_slice(payload)), next)
        }
    }
}

fn age(created_at: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(created_at)
        .unwrap_or(Duration::ZERO)
}

fn is_expired(created_at: SystemTime, now: SystemTime, retention: Duration) -> bool {
    now.duration_since(created_at)
        .map_or(false, |age| age > retention)
}

/// Start offset of the oldest segment still inside retention; if everything
/// is expired, the active segment's start.
fn oldest_offset_in(segments: &[LogSegment], now: SystemTime, retention: Duration) -> u64 {
    let idx = segments.partition_point(|s| is_expired(s.created_at(), now, retention));
    if idx == segments.len() {
        segments[segments.len() - 1].start_offset()
    } else {
        segments[idx].start_offset()
    }
}

fn validate_topic_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 249
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTopicName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logstream_core::record::checksum;

    fn store_with(dir: &Path, f: impl FnOnce(&mut StorageConfig)) -> LogStore {
        let mut config = StorageConfig::new(dir);
        f(&mut config);
        LogStore::open(config).unwrap()
    }

    // ---------------------------------------------------------------
    // Scenario: sequential appends address the log by byte offset
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_append_read_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |_| {});

        assert_eq!(store.append("x", b"a", None).await.unwrap(), 0);
        assert_eq!(store.append("x", b"b", None).await.unwrap(), 5);
        assert_eq!(store.append("x", b"c", None).await.unwrap(), 10);

        let (msg, next) = store.read_message("x", 0, false).unwrap();
        assert_eq!(msg.as_deref(), Some(&b"a"[..]));
        assert_eq!(next, 5);

        let (msg, next) = store.read_message("x", 5, false).unwrap();
        assert_eq!(msg.as_deref(), Some(&b"b"[..]));
        assert_eq!(next, 10);

        assert!(store.is_available("x", 10));
        assert!(!store.is_available("x", 15));

        // Offset 15 is the write offset: nothing there yet.
        let (msg, next) = store.read_message("x", 15, false).unwrap();
        assert!(msg.is_none());
        assert_eq!(next, 15);
    }

    #[tokio::test]
    async fn test_append_with_checksum_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |_| {});

        let payload = b"checksummed payload";
        let crc = checksum(payload);
        let start = store.append("t", payload, Some(&crc)).await.unwrap();
        assert_eq!(start, 0);

        let (msg, next) = store.read_message("t", start, true).unwrap();
        assert_eq!(msg.as_deref(), Some(&payload[..]));
        assert_eq!(next, start + 4 + payload.len() as u64 + 4);

        // Without verification the trailer is part of the returned body.
        let (msg, _) = store.read_message("t", start, false).unwrap();
        assert_eq!(msg.unwrap().len(), payload.len() + 4);
    }

    #[tokio::test]
    async fn test_append_rejections_leave_log_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |_| {});
        store.append("t", b"seed", None).await.unwrap();
        let latest = store.latest_offset("t");

        assert!(matches!(
            store.append("t", b"", None).await.unwrap_err(),
            Error::Record(logstream_core::Error::EmptyPayload)
        ));
        assert!(matches!(
            store.append("t", b"data", Some(b"xy")).await.unwrap_err(),
            Error::Record(logstream_core::Error::InvalidChecksumLength { .. })
        ));
        let wrong = checksum(b"other");
        assert!(matches!(
            store.append("t", b"data", Some(&wrong)).await.unwrap_err(),
            Error::Record(logstream_core::Error::ChecksumMismatch)
        ));

        assert_eq!(store.latest_offset("t"), latest);
    }

    #[tokio::test]
    async fn test_record_too_large_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |c| {
            c.segment_max_bytes = 256;
            c.segment_grow_bytes = 64;
        });
        let big = vec![0xAB; 300];
        assert!(matches!(
            store.append("t", &big, None).await.unwrap_err(),
            Error::RecordTooLarge { .. }
        ));
        assert_eq!(store.latest_offset("t"), 0);
    }

    // ---------------------------------------------------------------
    // Growth and rollover
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_growth_within_segment() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |c| {
            c.segment_max_bytes = 4096;
            c.segment_grow_bytes = 128;
        });
        // 20 records of 100 bytes overflow the 128-byte initial size many
        // times over but stay under the 4096 cap: one segment, grown.
        for i in 0..20u8 {
            store.append("t", &vec![i; 100], None).await.unwrap();
        }
        assert_eq!(store.latest_offset("t"), 20 * 104);
        let files: Vec<_> = std::fs::read_dir(dir.path().join("t"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);

        // Everything reads back.
        let mut offset = 0;
        for i in 0..20u8 {
            let (msg, next) = store.read_message("t", offset, false).unwrap();
            assert_eq!(msg.unwrap(), vec![i; 100]);
            offset = next;
        }
    }

    #[tokio::test]
    async fn test_rollover_contiguity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |c| {
            c.segment_max_bytes = 512;
            c.segment_grow_bytes = 256;
        });
        // Each record takes 104 bytes; 512-byte segments hold 4. Write 10 to
        // force at least two rollovers.
        for i in 0..10u8 {
            store.append("t", &vec![i; 100], None).await.unwrap();
        }

        let mut starts: Vec<u64> = std::fs::read_dir(dir.path().join("t"))
            .unwrap()
            .filter_map(|e| parse_start_offset(&e.unwrap().path()))
            .collect();
        starts.sort_unstable();
        // Segments cap at 512 bytes and hold 4 records each: every start
        // offset equals the prior segment's final write offset.
        assert_eq!(starts, vec![0, 416, 832]);

        let mut offset = 0;
        for i in 0..10u8 {
            let (msg, next) = store.read_message("t", offset, false).unwrap();
            assert_eq!(msg.unwrap(), vec![i; 100], "record {i} at offset {offset}");
            assert_eq!(next, offset + 104);
            offset = next;
        }
    }

    #[tokio::test]
    async fn test_reopen_recovers_write_offset_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = store_with(dir.path(), |c| {
                c.segment_max_bytes = 512;
                c.segment_grow_bytes = 256;
            });
            for i in 0..6u8 {
                store.append("t", &vec![i; 100], None).await.unwrap();
            }
            store.flush_all().await;
        }
        let store = store_with(dir.path(), |c| {
            c.segment_max_bytes = 512;
            c.segment_grow_bytes = 256;
        });
        assert_eq!(store.latest_offset("t"), 6 * 104);
        let (msg, _) = store.read_message("t", 104, false).unwrap();
        assert_eq!(msg.unwrap(), vec![1u8; 100]);

        // Appends continue from the recovered offset.
        assert_eq!(store.append("t", b"tail", None).await.unwrap(), 6 * 104);
    }

    // ---------------------------------------------------------------
    // Corruption handling on the read path
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_verify_skips_record_without_valid_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |_| {});
        // Appended without a trailer; verifying readers treat the last 4
        // payload bytes as a checksum, fail, and skip the whole record.
        let start = store.append("t", b"plain-record", None).await.unwrap();
        let next_expected = start + 4 + 12;

        let (msg, next) = store.read_message("t", start, true).unwrap();
        assert!(msg.is_none());
        assert_eq!(next, next_expected);
    }

    // ---------------------------------------------------------------
    // Expiry
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_expired_read_fast_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |c| {
            c.retention_ms = 150;
            c.segment_max_bytes = 512;
            c.segment_grow_bytes = 256;
        });
        for i in 0..5u8 {
            store.append("t", &vec![i; 100], None).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Everything is past retention now. A fresh append opens a new
        // segment (age-based rollover) and becomes the oldest live data.
        let start = store.append("t", b"fresh", None).await.unwrap();

        let (msg, next) = store.read_message("t", 0, false).unwrap();
        assert!(msg.is_none());
        assert_eq!(next, start, "lagging reader fast-forwarded to oldest");
        assert_eq!(store.oldest_offset("t"), start);

        let (msg, _) = store.read_message("t", next, false).unwrap();
        assert_eq!(msg.as_deref(), Some(&b"fresh"[..]));
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |c| {
            c.retention_ms = 100;
            c.deletion_grace_ms = 50;
            c.segment_max_bytes = 512;
            c.segment_grow_bytes = 256;
        });
        for i in 0..10u8 {
            store.append("t", &vec![i; 100], None).await.unwrap();
        }
        let topic = store.get_topic("t").unwrap();
        let before = topic.snapshot().len();
        assert!(before >= 3);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let dropped = store.sweep_expired(SystemTime::now());
        // Every sealed segment expired; only the active one survives.
        assert_eq!(dropped.len(), before - 1);
        assert_eq!(topic.snapshot().len(), 1);

        for (path, _) in &dropped {
            store.purge_segment(path).unwrap();
            assert!(!path.exists());
        }
    }

    #[tokio::test]
    async fn test_sweep_never_touches_fresh_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |c| {
            c.segment_max_bytes = 512;
            c.segment_grow_bytes = 256;
        });
        for i in 0..10u8 {
            store.append("t", &vec![i; 100], None).await.unwrap();
        }
        assert!(store.sweep_expired(SystemTime::now()).is_empty());
    }

    // ---------------------------------------------------------------
    // Misc
    // ---------------------------------------------------------------

    #[test]
    fn test_invalid_topic_names() {
        for name in ["", "a/b", "..", "white space", "emoji\u{1F600}"] {
            assert!(validate_topic_name(name).is_err(), "accepted {:?}", name);
        }
        for name in ["orders", "__consumer_offset", "a.b-c_d", "0"] {
            assert!(validate_topic_name(name).is_ok(), "rejected {:?}", name);
        }
    }

    #[test]
    fn test_unknown_topic_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), |_| {});
        let (msg, next) = store.read_message("ghost", 42, false).unwrap();
        assert!(msg.is_none());
        assert_eq!(next, 42);
        assert_eq!(store.latest_offset("ghost"), 0);
        assert!(!store.is_available("ghost", 0));
    }
}
