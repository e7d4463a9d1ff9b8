//! File source trait and implementations.
//!
//! This module defines the [`FileSource`] trait, which provides a unified
//! interface over "a place files live" across different backends (local
//! filesystem, S3-compatible services, etc.).

mod local;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod ro;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalFileSource;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockFileSource;
pub use self::ro::ReadOnlyFileSource;
#[cfg(feature = "s3")]
pub use self::s3::{S3Credentials, S3FileSource};
use crate::error::{ErrorKind, Result};
use crate::{ConnectionStatus, FileId, FileQuery, FileSourceComparison, FileSourceConfig, FileSourceFile};
use async_trait::async_trait;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub type FileStream<'a> = Pin<Box<dyn Stream<Item = Result<FileSourceFile>> + Send + 'a>>;
/// Backend-native readable stream. The caller owns (and drops) it.
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Unified interface for file sources.
///
/// # Absence
/// Lookups are existence queries: [`find_file()`](Self::find_file) and
/// [`find_files()`](Self::find_files) report a missing file as `None` or an
/// empty list. Streaming opens assume existence:
/// [`get_input_stream()`](Self::get_input_stream) and
/// [`get_content()`](Self::get_content) raise
/// [`NotFound`](crate::error::ErrorKind::NotFound).
///
/// # Streams
/// Streams handed in by the caller are never closed by the backend. Streams
/// a backend opens internally are released before the call returns.
///
/// # Examples
///
/// ```
/// use siphon_storage::{FileSource, FileSourceFile, ComparisonStatus, error::Result};
///
/// async fn needs_upload(remote: &dyn FileSource, local_file: &FileSourceFile) -> Result<bool> {
///     let comparison = remote.compare(local_file).await?;
///     Ok(matches!(comparison.status, ComparisonStatus::NotPresent | ComparisonStatus::Older))
/// }
/// ```
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Name of the configured source (taken from the configuration key).
    /// Used for logging only, so uniqueness isn't enforced.
    fn name(&self) -> &str;

    fn config(&self) -> &FileSourceConfig;

    /// Establish whatever session the backend needs.
    ///
    /// Idempotent, and fails fast: it never waits on anything a user would
    /// have to retry.
    async fn open_connection(&self) -> Result<ConnectionStatus>;

    /// Release session resources. Safe to call without a prior open.
    async fn close_connection(&self) -> Result<ConnectionStatus>;

    /// Point lookup by identifier. `Ok(None)` if absent.
    async fn find_file(&self, id: &FileId) -> Result<Option<FileSourceFile>>;

    /// Enumerate files satisfying the query's recursion flag and name pattern,
    /// never yielding hidden entries. The query's predicate is **not** applied
    /// here; use [`find_files_stream()`](Self::find_files_stream).
    ///
    /// Ordering is whatever the backend's traversal produces. Entries that
    /// disappear while listing are skipped rather than reported as errors.
    fn scan<'a>(&'a self, query: &'a FileQuery) -> FileStream<'a>;

    /// Stream every file matching the query, predicate included.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use siphon_storage::{FileSource, FileQuery, error::Result};
    /// # async fn example(source: &dyn FileSource) -> Result<()> {
    /// let query = FileQuery::all().pattern(r".*\.csv")?.recursive(true);
    /// let mut stream = source.find_files_stream(&query);
    /// while let Some(file) = stream.try_next().await? {
    ///     println!("{}: {} bytes", file.id, file.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn find_files_stream<'a>(&'a self, query: &'a FileQuery) -> FileStream<'a> {
        Box::pin(self.scan(query).try_filter(move |file| std::future::ready(query.accepts(file))))
    }

    /// Collect [`find_files_stream()`](Self::find_files_stream) into a [`Vec`].
    async fn find_files(&self, query: &FileQuery) -> Result<Vec<FileSourceFile>> {
        self.find_files_stream(query).try_collect().await
    }

    /// Open the file for streaming reads.
    async fn get_input_stream(&self, file: &FileSourceFile) -> Result<BoxAsyncRead>;

    /// Stream the file's bytes into a caller-owned sink.
    ///
    /// The sink is flushed but never shut down. Returns the file that was
    /// read on success.
    async fn get_content(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        file: &FileSourceFile,
    ) -> Result<FileSourceFile> {
        let mut reader = self.get_input_stream(file).await?;
        let bytes = tokio::io::copy(&mut reader, &mut *sink).await.or_raise(|| ErrorKind::transfer("get", &file.id))?;
        sink.flush().await.or_raise(|| ErrorKind::transfer("get", &file.id))?;
        tracing::debug!(source = self.name(), id = %file.id, bytes, "Streamed file content");
        Ok(file.clone())
    }

    /// Stream caller-owned bytes into the backend at `file.id`.
    ///
    /// Creates intermediate directories/keys and overwrites existing content.
    /// The file's `producer_modified` date is preserved where the backend can
    /// store it, so a later [`compare()`](Self::compare) of the same file
    /// reports [`Same`](crate::ComparisonStatus::Same).
    async fn put_content(&self, source: &mut (dyn AsyncRead + Send + Unpin), file: &FileSourceFile) -> Result<()>;

    /// Look up `candidate.id` here and compare freshness against it.
    async fn compare(&self, candidate: &FileSourceFile) -> Result<FileSourceComparison> {
        let found = self.find_file(&candidate.id).await?;
        Ok(FileSourceComparison::evaluate(found, candidate))
    }

    /// Relocate a file within this backend, overwriting anything at `new_id`.
    ///
    /// Returns the freshly looked-up file at its new id. Whether the move is
    /// atomic depends on the backend.
    async fn move_file(&self, file: &FileSourceFile, new_id: &FileId) -> Result<FileSourceFile>;
}
