//! logstream Storage Layer
//!
//! The storage engine behind the broker: durable, segmented, append-only
//! topic logs addressed by a monotonically increasing global byte offset.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────┐
//! │      LogStore      │  append / read_message / offsets
//! └─────────┬──────────┘
//!           │ per topic
//!           ▼
//! ┌────────────────────┐     ┌───────────────────┐
//! │  segment list      │     │   SegmentCache    │
//! │  [sealed..,active] │────▶│  LRU of sealed    │
//! │  (Arc snapshot)    │     │  mmap handles     │
//! └─────────┬──────────┘     └───────────────────┘
//!           │
//!           ▼
//! ┌────────────────────┐     ┌───────────────────┐
//! │  ActiveSegment     │     │ MaintenanceTasks  │
//! │  mmap + atomic     │◀────│ sweep / delete /  │
//! │  write offset      │     │ lazy flush        │
//! └────────────────────┘     └───────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Per-topic offsets never decrease or repeat, across rollovers and
//!   deletions alike.
//! - At most one active (writable) segment per topic; sealed bytes never
//!   change.
//! - Segment lists are replaced wholesale, so concurrent readers always see
//!   a complete, consistent list.
//! - Consumers that fall behind retention are fast-forwarded to the oldest
//!   surviving offset instead of erroring.
//!
//! Client offsets self-host as checkpoint records in the reserved
//! `__consumer_offset` topic ([`OffsetStore`]), which is stored and retained
//! exactly like a user topic.

pub mod cache;
pub mod config;
pub mod error;
pub mod log;
pub mod maintenance;
pub mod offsets;
pub mod segment;

pub use cache::SegmentCache;
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use log::LogStore;
pub use maintenance::MaintenanceTasks;
pub use offsets::{OffsetStore, OFFSETS_TOPIC};
