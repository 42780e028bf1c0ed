//! Core types shared across the logstream crates: the on-disk record frame
//! and the CRC32 checksum helpers that guard it.

pub mod error;
pub mod record;

pub use error::{Error, Result};
pub use record::{checksum, checksum_matches, RecordView, CHECKSUM_LEN, LEN_PREFIX};
