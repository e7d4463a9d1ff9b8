//! CLI Error Types

use derive_more::{Display, Error};

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("invalid argument: {_0}")]
    Argument(#[error(not(source))] String),
    #[display("could not connect to `{_0}`")]
    Connection(#[error(not(source))] String),
    #[display("could not list files in `{_0}`")]
    Listing(#[error(not(source))] String),
    #[display("could not compare `{_0}`")]
    Compare(#[error(not(source))] String),
    #[display("could not transfer `{_0}`")]
    Transfer(#[error(not(source))] String),
    #[display("transferred `{_0}`, but could not archive it")]
    Archive(#[error(not(source))] String),
    #[display("could not move `{_0}`")]
    Move(#[error(not(source))] String),
    #[display("{_0} file(s) failed to sync")]
    Incomplete(#[error(not(source))] usize),
}
