//! Comparison-driven sync between two file sources.
//!
//! Every file listed in the origin is compared against the destination in
//! chunks of `batch_size` (one chunk's comparisons run concurrently), and the
//! resulting [`SyncAction`] decides whether it's transferred.

use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use futures::future::join_all;
use siphon_batch::ChunkedList;
use siphon_storage::{
    ComparisonStatus, FileId, FileQuery, FileSourceComparison, FileSourceFile, FileSourceHandle, SyncAction,
};

pub struct SyncOptions {
    pub query: FileQuery,
    /// Transfer [`Conflict`](SyncAction::Conflict)s too, replacing the newer
    /// destination copy.
    pub force: bool,
    /// After a file is delivered, move it under this prefix in the origin.
    pub archive: Option<FileId>,
    pub batch_size: usize,
}

/// Progress events emitted by [`sync`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started), exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete), exactly once, with the
///    number of files to consider.
/// 3. [`Synced`](Self::Synced), zero or more times, one per file.
/// 4. [`Complete`](Self::Complete), exactly once.
///
/// A listing failure terminates the stream early, in which case
/// [`Complete`](Self::Complete) is never emitted.
#[derive(Debug)]
pub enum SyncEvent {
    Started,
    DiscoveryComplete(u64),
    Synced(Outcome),
    Complete,
}

/// What happened to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub id: FileId,
    pub status: ComparisonStatus,
    pub action: SyncAction,
    pub transferred: bool,
    /// Where the origin file was archived to, if it was.
    pub archived: Option<FileId>,
}

/// Streams [`SyncEvent`]s while syncing `from` into `to`.
///
/// Individual file failures are surfaced as `Err` items without terminating
/// the stream; only a listing failure is fatal. Files already under the
/// archive prefix are never considered.
pub fn sync<'a>(
    from: &'a FileSourceHandle,
    to: &'a FileSourceHandle,
    options: &'a SyncOptions,
) -> impl Stream<Item = Result<SyncEvent>> + 'a {
    stream!({
        yield Ok(SyncEvent::Started);

        let mut files = match from.find_files(&options.query).await.or_raise(|| ErrorKind::Listing(from.name().to_string())) {
            Ok(files) => files,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        if let Some(prefix) = &options.archive {
            files.retain(|file| !is_under(&file.id, prefix));
        }
        yield Ok(SyncEvent::DiscoveryComplete(u64::try_from(files.len()).unwrap_or(0)));

        let mut chunks = ChunkedList::new(files, options.batch_size);
        while chunks.has_more() {
            let chunk = chunks.next_chunk();
            tracing::debug!(files = chunk.len(), "Syncing chunk");
            let results = join_all(chunk.iter().map(|file| sync_file(from, to, options, file))).await;
            for result in results {
                yield result.map(SyncEvent::Synced);
            }
        }

        yield Ok(SyncEvent::Complete);
    })
}

async fn sync_file(
    from: &FileSourceHandle,
    to: &FileSourceHandle,
    options: &SyncOptions,
    file: &FileSourceFile,
) -> Result<Outcome> {
    let comparison = to.compare(file).await.or_raise(|| ErrorKind::Compare(file.id.to_string()))?;
    let action = comparison.action();
    let transferred = action.transfers(options.force);
    if transferred {
        transfer(from, to, file).await?;
    }
    // Skipped files are already at the destination, so they count as delivered.
    let delivered = transferred || action == SyncAction::Skip;
    let archived = match &options.archive {
        Some(prefix) if delivered => Some(archive(from, file, prefix).await?),
        _ => None,
    };
    tracing::info!(id = %file.id, status = %comparison.status, %action, transferred, "Synced file");
    Ok(Outcome {
        id: file.id.clone(),
        status: comparison.status,
        action,
        transferred,
        archived,
    })
}

/// Stream one file's content from `from` into `to` under the same id.
pub async fn transfer(from: &FileSourceHandle, to: &FileSourceHandle, file: &FileSourceFile) -> Result<()> {
    let mut reader = from.get_input_stream(file).await.or_raise(|| ErrorKind::Transfer(file.id.to_string()))?;
    to.put_content(&mut reader, file).await.or_raise(|| ErrorKind::Transfer(file.id.to_string()))
}

async fn archive(from: &FileSourceHandle, file: &FileSourceFile, prefix: &FileId) -> Result<FileId> {
    let target = prefix.join(file.id.as_str()).or_raise(|| ErrorKind::Archive(file.id.to_string()))?;
    let moved = from.move_file(file, &target).await.or_raise(|| ErrorKind::Archive(file.id.to_string()))?;
    Ok(moved.id)
}

/// Compare each file against `to`, `batch_size` lookups at a time. Results
/// keep the input order.
pub async fn compare_all(
    to: &FileSourceHandle,
    files: Vec<FileSourceFile>,
    batch_size: usize,
) -> Vec<(FileId, Result<FileSourceComparison>)> {
    let mut results = Vec::with_capacity(files.len());
    for chunk in ChunkedList::new(files, batch_size) {
        let comparisons = join_all(chunk.iter().map(|file| async move {
            to.compare(file).await.or_raise(|| ErrorKind::Compare(file.id.to_string()))
        }))
        .await;
        results.extend(chunk.into_iter().map(|file| file.id).zip(comparisons));
    }
    results
}

fn is_under(id: &FileId, prefix: &FileId) -> bool {
    id.as_str().strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
}
