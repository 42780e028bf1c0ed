//! Broker Error Types
//!
//! `Protocol` errors terminate the offending connection; storage errors on a
//! publish are rejections or infrastructure failures depending on
//! [`logstream_storage::Error::is_rejection`].

use thiserror::Error;

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(#[from] logstream_storage::Error),
}
