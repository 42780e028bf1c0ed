//! Error Types for logstream-core
//!
//! Validation and integrity failures raised by the record layer. Higher
//! layers (`logstream-storage`, `logstream-broker`) wrap these in their own
//! error enums via `#[from]`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Empty payload")]
    EmptyPayload,

    #[error("Invalid checksum length: expected {expected} bytes, got {actual}")]
    InvalidChecksumLength { expected: usize, actual: usize },

    #[error("Checksum mismatch")]
    ChecksumMismatch,
}

pub type Result<T> = std::result::Result<T, Error>;
