//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Low-level causes (I/O, SDK errors)
//! stay attached as child frames of the actionable kind raised on top.

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
    /// The backend cannot be used as configured (bad root, not writable,
    /// malformed location). Raised at construction, never worth retrying.
    #[display("configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
    /// File does not exist
    #[display("file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied by the filesystem
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// Remote backend rejected the credentials, or the backend is locked out
    #[display("invalid credentials: {_0}")]
    Credentials(#[error(not(source))] String),
    /// Content transfer (get/put/move) failed; the cause is a child frame
    #[display("{operation} failed for {id}")]
    Transfer { operation: &'static str, id: String },
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Network-related error (S3 connections, timeouts, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// File id contains invalid characters or escapes the root
    #[display("invalid file id: {_0:?}")]
    InvalidId(#[error(not(source))] String),
    /// File name pattern is not a valid regular expression
    #[display("invalid file pattern: {_0:?}")]
    InvalidPattern(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    Backend(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Shorthand for the transfer context attached to get/put/move failures.
    pub fn transfer(operation: &'static str, id: impl ToString) -> Self {
        Self::Transfer { operation, id: id.to_string() }
    }

    /// Returns `true` if retrying might succeed.
    ///
    /// Retrying is always the caller's decision; nothing in this crate
    /// retries on its own (the S3 SDK's own back-off aside).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::Backend(_) | Self::Transfer { .. })
    }

    /// Returns `true` if the error is about credentials rather than transport,
    /// so a connection test can report "invalid credentials" specifically.
    pub fn is_credentials(&self) -> bool {
        matches!(self, Self::Credentials(_))
    }
}
