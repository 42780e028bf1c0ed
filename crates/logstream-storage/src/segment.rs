//! Memory-Mapped Log Segments
//!
//! A segment is one file-backed slice of a topic's log. Its filename encodes
//! its immutable starting global offset (`{offset:020}.log`), so the file
//! list alone reconstructs the topic's offset space.
//!
//! Exactly one segment per topic is **active**: writable, memory-mapped, and
//! pre-zeroed so unwritten space reads as the zero-length record sentinel.
//! All others are **sealed**: immutable on disk, represented in the topic's
//! segment list by plain metadata, and mapped on demand through the segment
//! cache.
//!
//! ## Reader lifetime discipline
//!
//! The writer owns the mutable mapping behind the per-topic writer lock and
//! publishes a separate read-only [`SegmentView`] (its own mapping of the
//! same file plus an atomic write offset). Growth and rollover publish a
//! fresh view; readers that captured the old `Arc` keep a valid mapping
//! until they drop it, so a concurrent seal can never close a mapping out
//! from under a read. Readers only dereference bytes below the view's write
//! offset, which the writer advances with release ordering after the bytes
//! land.

use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

use logstream_core::{record, RecordView};

use crate::error::Result;

const SEGMENT_SUFFIX: &str = "log";

/// Path of the segment starting at `start_offset` inside a topic directory.
pub fn segment_path(dir: &Path, start_offset: u64) -> PathBuf {
    dir.join(format!("{start_offset:020}.{SEGMENT_SUFFIX}"))
}

/// Parse a segment file name back into its starting global offset.
pub fn parse_start_offset(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != SEGMENT_SUFFIX {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Creation time from file metadata, falling back to mtime on filesystems
/// without birth times.
pub fn file_created_at(meta: &std::fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or_else(|_| SystemTime::now())
}

/// Read-only view of the active segment, shared with readers.
#[derive(Debug)]
pub struct SegmentView {
    path: PathBuf,
    start_offset: u64,
    created_at: SystemTime,
    map: Mmap,
    /// Absolute (topic-global) address of the next free byte.
    write_offset: AtomicU64,
}

impl SegmentView {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset.load(Ordering::Acquire)
    }

    pub fn data(&self) -> &[u8] {
        &self.map
    }
}

/// Metadata for a sealed segment. The mapping itself lives in the cache.
#[derive(Debug)]
pub struct SealedSegment {
    pub path: PathBuf,
    pub start_offset: u64,
    pub created_at: SystemTime,
    pub len: u64,
}

/// An open read-only mapping of a sealed segment; the cache's value type.
/// Dropping it releases the mapping and the file handle.
#[derive(Debug)]
pub struct SealedMapping {
    _file: File,
    map: Mmap,
}

impl SealedMapping {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: sealed segment files are immutable while the broker runs;
        // the mapping is read-only and bounds-checked on every access.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, map })
    }

    pub fn data(&self) -> &[u8] {
        &self.map
    }
}

/// The writable active segment, owned by the per-topic writer.
pub struct ActiveSegment {
    file: File,
    map: MmapMut,
    view: Arc<SegmentView>,
}

impl ActiveSegment {
    /// Create (or re-open, after a crash) the segment starting at
    /// `start_offset`, pre-sized to at least `initial_len` zeroed bytes.
    /// The write offset is recovered by walking length prefixes until the
    /// zero sentinel, so a leftover file resumes where it stopped.
    pub fn create(dir: &Path, start_offset: u64, initial_len: u64) -> Result<Self> {
        let path = segment_path(dir, start_offset);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        if file.metadata()?.len() < initial_len {
            file.set_len(initial_len)?;
        }
        let created_at = file_created_at(&file.metadata()?);
        Self::map(path, file, start_offset, created_at)
    }

    /// Re-open an existing segment file as the active one (startup path).
    pub fn open(path: PathBuf, start_offset: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let created_at = file_created_at(&file.metadata()?);
        Self::map(path, file, start_offset, created_at)
    }

    fn map(path: PathBuf, file: File, start_offset: u64, created_at: SystemTime) -> Result<Self> {
        // SAFETY: the topic directory is exclusive to this process; the
        // writable map is touched only under the per-topic writer lock.
        let map = unsafe { MmapMut::map_mut(&file)? };
        let write_offset = start_offset + recover_write_offset(&map);
        let read_map = unsafe { Mmap::map(&file)? };
        let view = Arc::new(SegmentView {
            path,
            start_offset,
            created_at,
            map: read_map,
            write_offset: AtomicU64::new(write_offset),
        });
        Ok(Self { file, map, view })
    }

    pub fn view(&self) -> Arc<SegmentView> {
        Arc::clone(&self.view)
    }

    pub fn start_offset(&self) -> u64 {
        self.view.start_offset
    }

    pub fn created_at(&self) -> SystemTime {
        self.view.created_at
    }

    pub fn write_offset(&self) -> u64 {
        self.view.write_offset()
    }

    /// Current mapped capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.map.len() as u64
    }

    /// Extend the file and both mappings by `grow` bytes, publishing a fresh
    /// view. Callers must re-publish the returned view into the topic's
    /// segment list so new readers see the larger mapping.
    pub fn grow(&mut self, grow: u64) -> Result<Arc<SegmentView>> {
        let new_len = self.capacity() + grow;
        self.file.set_len(new_len)?;
        // SAFETY: same exclusivity argument as `map`.
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        let read_map = unsafe { Mmap::map(&self.file)? };
        self.view = Arc::new(SegmentView {
            path: self.view.path.clone(),
            start_offset: self.view.start_offset,
            created_at: self.view.created_at,
            map: read_map,
            write_offset: AtomicU64::new(self.view.write_offset()),
        });
        Ok(self.view())
    }

    /// Write one framed record. The caller has already ensured capacity.
    /// Returns the record's starting global offset.
    pub fn write_record(&mut self, payload: &[u8], trailer: Option<&[u8]>) -> u64 {
        let start = self.write_offset();
        let pos = (start - self.view.start_offset) as usize;
        let body_len = payload.len() + trailer.map_or(0, <[u8]>::len);

        let len_bytes = (body_len as u32).to_be_bytes();
        self.map[pos..pos + record::LEN_PREFIX].copy_from_slice(&len_bytes);
        let mut cursor = pos + record::LEN_PREFIX;
        self.map[cursor..cursor + payload.len()].copy_from_slice(payload);
        cursor += payload.len();
        if let Some(trailer) = trailer {
            self.map[cursor..cursor + trailer.len()].copy_from_slice(trailer);
        }

        // Publish: readers load with acquire and never look past this.
        let next = start + record::encoded_len(body_len) as u64;
        self.view.write_offset.store(next, Ordering::Release);
        start
    }

    /// Flush the mapping and sync the file descriptor.
    pub fn flush(&self) -> std::io::Result<()> {
        self.map.flush()?;
        self.file.sync_all()
    }

    /// Seal this segment: final flush (best effort) and conversion to the
    /// metadata entry that replaces it in the segment list.
    pub fn seal(self) -> SealedSegment {
        if let Err(e) = self.flush() {
            warn!(path = %self.view.path.display(), error = %e, "flush on seal failed");
        }
        SealedSegment {
            path: self.view.path.clone(),
            start_offset: self.view.start_offset,
            created_at: self.view.created_at,
            len: self.map.len() as u64,
        }
    }
}

/// Walk length prefixes from the start of a mapping to find the first free
/// byte (segment-relative).
fn recover_write_offset(data: &[u8]) -> u64 {
    let mut pos = 0usize;
    loop {
        match RecordView::parse(data, pos) {
            RecordView::Record { body } => pos += record::encoded_len(body.len()),
            RecordView::Empty | RecordView::OutOfBounds => return pos as u64,
        }
    }
}
