//! Freshness comparison between a candidate file and a backend's copy.
//!
//! Everything in here is pure: the only I/O involved in a comparison is the
//! lookup [`FileSource::compare()`](crate::FileSource::compare) already does
//! before handing the result to [`FileSourceComparison::evaluate()`].

use crate::FileSourceFile;
use derive_more::Display;
use std::cmp::Ordering;
use time::OffsetDateTime;

/// How the backend's copy relates to the candidate.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonStatus {
    /// The backend has nothing under the candidate's id.
    #[display("not present")]
    NotPresent,
    /// The backend's file was produced after the candidate.
    #[display("newer")]
    Newer,
    /// The backend's file was produced before the candidate.
    #[display("older")]
    Older,
    #[display("same")]
    Same,
}

/// Result of [`FileSource::compare()`](crate::FileSource::compare).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSourceComparison {
    /// The backend's view of the file; `None` exactly when
    /// [`NotPresent`](ComparisonStatus::NotPresent).
    pub file: Option<FileSourceFile>,
    pub status: ComparisonStatus,
}
impl FileSourceComparison {
    /// Compare what a backend found (if anything) against the candidate.
    ///
    /// Only `producer_modified` is considered, at millisecond resolution.
    pub fn evaluate(found: Option<FileSourceFile>, candidate: &FileSourceFile) -> Self {
        let status = match &found {
            None => ComparisonStatus::NotPresent,
            Some(existing) => match truncate_millis(existing.producer_modified).cmp(&truncate_millis(candidate.producer_modified)) {
                Ordering::Greater => ComparisonStatus::Newer,
                Ordering::Less => ComparisonStatus::Older,
                Ordering::Equal => ComparisonStatus::Same,
            },
        };
        Self { file: found, status }
    }

    /// The sync decision for this comparison.
    pub fn action(&self) -> SyncAction {
        SyncAction::from(self.status)
    }
}

/// What a sync job should do with a candidate, given how the destination
/// compares to it.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    /// Destination doesn't have it; transfer.
    #[display("upload")]
    Upload,
    /// Destination has an older version; transfer and replace it.
    #[display("overwrite")]
    Overwrite,
    /// Destination has a newer version. Whether that's skipped or forced is
    /// the orchestrator's policy.
    #[display("conflict")]
    Conflict,
    #[display("skip")]
    Skip,
}
impl From<ComparisonStatus> for SyncAction {
    fn from(status: ComparisonStatus) -> Self {
        match status {
            ComparisonStatus::NotPresent => Self::Upload,
            ComparisonStatus::Older => Self::Overwrite,
            ComparisonStatus::Newer => Self::Conflict,
            ComparisonStatus::Same => Self::Skip,
        }
    }
}
impl SyncAction {
    /// Returns `true` if the candidate should be transferred. Conflicts only
    /// transfer when the caller forces them.
    pub fn transfers(&self, force: bool) -> bool {
        match self {
            Self::Upload | Self::Overwrite => true,
            Self::Conflict => force,
            Self::Skip => false,
        }
    }
}

// Object stores and some filesystems keep coarser clocks than nanoseconds;
// milliseconds is the common denominator.
fn truncate_millis(at: OffsetDateTime) -> i128 {
    at.unix_timestamp_nanos() / 1_000_000
}
