//! File metadata as seen by a file source.

use crate::FileId;
use time::OffsetDateTime;

/// Snapshot of one file's metadata, as tracked by a specific backend.
///
/// Built fresh by every listing or lookup. It is **not** a handle: nothing
/// guarantees the underlying file is unchanged after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSourceFile {
    /// Backend-relative identifier
    pub id: FileId,
    /// When the content last changed at its origin
    pub producer_modified: OffsetDateTime,
    /// When the backend itself last stored the file
    pub source_modified: OffsetDateTime,
    /// Free-form tag stamped by whichever configuration wrote the file
    pub owner: String,
    /// File size in bytes
    pub size: u64,
    /// Best-effort content type
    pub mime_type: Option<String>,
}
impl FileSourceFile {
    /// Create file metadata where the backend can't tell "produced" from
    /// "stored" apart (both dates are the same timestamp).
    pub fn new(id: FileId, modified: OffsetDateTime, owner: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            producer_modified: modified,
            source_modified: modified,
            owner: owner.into(),
            size,
            mime_type: None,
        }
    }

    pub fn with_producer_modified(mut self, producer_modified: OffsetDateTime) -> Self {
        self.producer_modified = producer_modified;
        self
    }

    pub fn with_mime_type(mut self, mime_type: Option<impl Into<String>>) -> Self {
        self.mime_type = mime_type.map(Into::into);
        self
    }

    /// Same metadata, addressed by a different id (for transfers between
    /// sources or under an archive prefix).
    pub fn with_id(mut self, id: FileId) -> Self {
        self.id = id;
        self
    }
}
