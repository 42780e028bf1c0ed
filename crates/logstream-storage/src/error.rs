//! Storage Error Types
//!
//! Errors raised by the segmented log store. Validation and integrity
//! failures from the record layer pass through transparently so callers can
//! distinguish a rejected publish (no mutation happened) from an IO failure.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Record(#[from] logstream_core::Error),

    #[error("Record of {size} bytes exceeds maximum segment size {max}")]
    RecordTooLarge { size: u64, max: u64 },

    #[error("Invalid topic name: {0:?}")]
    InvalidTopicName(String),
}

impl Error {
    /// Whether this error is a synchronous publish rejection (the log was
    /// not mutated), as opposed to an infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Record(_) | Error::RecordTooLarge { .. })
    }
}
