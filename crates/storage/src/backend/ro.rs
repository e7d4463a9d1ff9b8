//! Read-only file source decorator.
//!
//! This module provides a file source that wraps another implementation and
//! prevents write operations from executing, while still indicating success
//! on return. Handy for dry runs of a sync.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::backend::{BoxAsyncRead, FileStream};
use crate::error::Result;
use crate::{
    ConnectionStatus, FileId, FileQuery, FileSource, FileSourceConfig, FileSourceFile, FileSourceHandle,
};

/// Read-only file source.
///
/// Wraps another source and silently drops all write operations, logging an
/// [`info event`](tracing::Event). Moves report the file as if it had moved,
/// without touching the wrapped source.
#[derive(Clone)]
pub struct ReadOnlyFileSource {
    inner: FileSourceHandle,
}
impl ReadOnlyFileSource {
    pub fn new(inner: FileSourceHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FileSource for ReadOnlyFileSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn config(&self) -> &FileSourceConfig {
        self.inner.config()
    }

    async fn open_connection(&self) -> Result<ConnectionStatus> {
        self.inner.open_connection().await
    }

    async fn close_connection(&self) -> Result<ConnectionStatus> {
        self.inner.close_connection().await
    }

    async fn find_file(&self, id: &FileId) -> Result<Option<FileSourceFile>> {
        self.inner.find_file(id).await
    }

    fn scan<'a>(&'a self, query: &'a FileQuery) -> FileStream<'a> {
        self.inner.scan(query)
    }

    async fn get_input_stream(&self, file: &FileSourceFile) -> Result<BoxAsyncRead> {
        self.inner.get_input_stream(file).await
    }

    async fn put_content(&self, _source: &mut (dyn AsyncRead + Send + Unpin), file: &FileSourceFile) -> Result<()> {
        tracing::info!(source = self.name(), id = %file.id, "Skipping write during read-only mode");
        Ok(())
    }

    async fn move_file(&self, file: &FileSourceFile, new_id: &FileId) -> Result<FileSourceFile> {
        tracing::info!(source = self.name(), from = %file.id, to = %new_id, "Skipping move during read-only mode");
        Ok(file.clone().with_id(new_id.clone()))
    }
}
