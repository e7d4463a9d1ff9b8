//! Backend configuration and connection state.

use derive_more::Display;

/// Connection parameters shared by every backend.
///
/// Immutable once a backend has been constructed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSourceConfig {
    /// Root directory (local) or `bucket[/prefix]` (object storage)
    pub location: String,
    /// Tag stamped onto files this source writes
    pub owner: String,
}
impl FileSourceConfig {
    pub fn new(location: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            owner: owner.into(),
        }
    }
}

/// Outcome of opening or closing a backend connection.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    #[display("open")]
    Open,
    #[display("closed")]
    Closed,
    /// The remote side rejected our credentials. Data operations fail fast
    /// until the connection is closed and re-opened.
    #[display("locked out")]
    LockedOut,
}
