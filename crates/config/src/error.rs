//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Sources could not be read or merged; the figment error is a child frame
    #[display("could not load configuration")]
    Load,
    /// An explicitly requested config file doesn't exist
    #[display("configuration file not found: {}", _0.display())]
    FileNotFound(#[error(not(source))] PathBuf),
    /// Loaded fine, but the values make no sense
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    /// No source with this name is configured
    #[display("unknown file source: {_0}")]
    UnknownSource(#[error(not(source))] String),
    /// The backend refused its configuration; the storage error is a child frame
    #[display("could not build file source `{_0}`")]
    Build(#[error(not(source))] String),
}
