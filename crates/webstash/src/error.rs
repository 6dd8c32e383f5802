//! Facade Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A facade error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The controller for this configuration never became ready inside the
    /// polling ceiling. The only hard failure this crate reports.
    #[display("cache controller not ready within the polling ceiling")]
    ReadyTimeout,
    /// The configuration could not be fingerprinted.
    #[display("configuration could not be fingerprinted")]
    Config,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ReadyTimeout)
    }
}
