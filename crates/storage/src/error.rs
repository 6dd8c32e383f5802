//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Backend-native errors (sqlx, I/O, serde) are normalized into these kinds
//! at the adapter boundary; nothing above the adapter layer ever matches on
//! a backend-specific error type.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The backend is unavailable on this system. Permanent; detected at
    /// probe or self-test time, never mid-operation.
    #[display("storage backend unsupported")]
    Unsupported,
    /// The open-time write/read-back/delete check failed.
    #[display("storage self-test failed")]
    SelfTest,
    /// The store refused a write because it would exceed its byte quota.
    #[display("storage quota exceeded ({used} of {quota} bytes)")]
    QuotaExceeded { used: u64, quota: u64 },
    /// The cache key cannot be mapped onto this backend.
    #[display("invalid cache key: {_0}")]
    InvalidKey(#[error(not(source))] String),
    /// A persisted record could not be encoded or decoded.
    #[display("invalid record data")]
    Serialization,
    /// SQL engine failure.
    #[display("database error")]
    Database,
    /// Underlying I/O error.
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Anything else backend-specific.
    #[display("backend error: {_0}")]
    Backend(#[error(not(source))] String),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Database | Self::Backend(_))
    }
}
