//! Sealed-Segment Cache with LRU Eviction
//!
//! Sealed segments stay on disk but their open handles (file + read-only
//! mapping) are a bounded resource. This cache keeps the most recently read
//! mappings open, keyed by segment path, and releases the oldest ones under
//! pressure. Eviction drops the [`SealedMapping`], which closes the mapping
//! and the file descriptor; the segment's bytes remain on disk and reload on
//! the next miss.
//!
//! The active segment never enters the cache — the log store holds it
//! directly.
//!
//! All operations take one short-held lock and are O(1).

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::segment::SealedMapping;

pub struct SegmentCache {
    inner: Mutex<LruCache<PathBuf, Arc<SealedMapping>>>,
}

impl SegmentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up an open mapping, refreshing its recency.
    pub fn get(&self, path: &Path) -> Option<Arc<SealedMapping>> {
        self.inner.lock().unwrap().get(path).cloned()
    }

    /// Insert a mapping, evicting the least recently used entry past
    /// capacity. The evicted mapping is released as soon as its last reader
    /// drops it.
    pub fn put(&self, path: PathBuf, mapping: Arc<SealedMapping>) {
        let evicted = self.inner.lock().unwrap().push(path, mapping);
        if let Some((path, _)) = evicted {
            debug!(path = %path.display(), "evicted sealed segment mapping");
        }
    }

    /// Forced eviction, used before deleting a segment file on disk.
    pub fn remove(&self, path: &Path) -> Option<Arc<SealedMapping>> {
        self.inner.lock().unwrap().pop(path)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
