//! In-memory file source for testing.

use super::{BoxAsyncRead, FileStream};
use crate::error::{ErrorKind, Result};
use crate::mime;
use crate::{ConnectionStatus, FileId, FileQuery, FileSource, FileSourceConfig, FileSourceFile};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::io::Cursor;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    producer_modified: OffsetDateTime,
    stored_at: OffsetDateTime,
    owner: String,
    data: Vec<u8>,
}

/// In-memory file source for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Listing follows
/// the same rules as the real backends: `/` separates "directories", hidden
/// components are skipped, and the name pattern applies to the base name.
///
/// # Examples
///
/// ```
/// use siphon_storage::{FileId, FileSource, backend::MockFileSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = MockFileSource::with_files([("plant/line-1.csv", b"t,v\n")]);
/// assert!(source.find_file(&FileId::parse("plant/line-1.csv")?).await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct MockFileSource {
    name: String,
    config: FileSourceConfig,
    storage: RwLock<HashMap<FileId, Entry>>,
    connection: RwLock<ConnectionStatus>,
}

impl MockFileSource {
    /// Create a mock source pre-populated with files, all produced "now".
    ///
    /// Panics if any id fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self::with_dated_files(files.into_iter().map(|(id, data)| (id, now, data)))
    }

    /// Create a mock source pre-populated with files and their producer dates.
    pub fn with_dated_files(
        files: impl IntoIterator<Item = (impl AsRef<str>, OffsetDateTime, impl Into<Vec<u8>>)>,
    ) -> Self {
        let config = FileSourceConfig::new("memory", "mock");
        let now = OffsetDateTime::now_utc();
        let mut map = HashMap::new();
        for (id, produced, data) in files {
            let Ok(validated) = FileId::parse(id.as_ref()) else {
                // Test fixture: a bad id means the test itself is broken.
                panic!("MockFileSource::with_files: invalid id {}", id.as_ref());
            };
            let entry = Entry {
                producer_modified: produced,
                stored_at: now,
                owner: config.owner.clone(),
                data: data.into(),
            };
            map.insert(validated, entry);
        }
        Self {
            name: "mock".to_string(),
            config,
            storage: RwLock::new(map),
            connection: RwLock::new(ConnectionStatus::Closed),
        }
    }

    /// Change the name of the mock source.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Raw content of a stored file, for assertions.
    pub async fn content(&self, id: &str) -> Option<Vec<u8>> {
        let id = FileId::parse(id).ok()?;
        self.storage.read().await.get(&id).map(|entry| entry.data.clone())
    }

    /// Observable connection state, since the mock has no real session.
    pub async fn connection_status(&self) -> ConnectionStatus {
        *self.connection.read().await
    }

    fn file_info(id: &FileId, entry: &Entry) -> FileSourceFile {
        FileSourceFile::new(id.clone(), entry.stored_at, &entry.owner, entry.data.len() as u64)
            .with_producer_modified(entry.producer_modified)
            .with_mime_type(mime::sniff(&entry.data[..entry.data.len().min(mime::SNIFF_LEN)]))
    }
}
impl Default for MockFileSource {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl FileSource for MockFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    async fn open_connection(&self) -> Result<ConnectionStatus> {
        *self.connection.write().await = ConnectionStatus::Open;
        Ok(ConnectionStatus::Open)
    }

    async fn close_connection(&self) -> Result<ConnectionStatus> {
        *self.connection.write().await = ConnectionStatus::Closed;
        Ok(ConnectionStatus::Closed)
    }

    async fn find_file(&self, id: &FileId) -> Result<Option<FileSourceFile>> {
        Ok(self.storage.read().await.get(id).map(|entry| Self::file_info(id, entry)))
    }

    fn scan<'a>(&'a self, query: &'a FileQuery) -> FileStream<'a> {
        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let files: Vec<FileSourceFile> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(id, _)| !id.is_hidden())
                    .filter(|(id, _)| query.is_recursive() || id.parent().is_none())
                    .filter(|(id, _)| query.matches_name(id.file_name()))
                    .map(|(id, entry)| Self::file_info(id, entry))
                    .collect()
            };
            for file in files {
                yield Ok(file);
            }
        })
    }

    async fn get_input_stream(&self, file: &FileSourceFile) -> Result<BoxAsyncRead> {
        let guard = self.storage.read().await;
        let entry = guard.get(&file.id).ok_or_raise(|| ErrorKind::NotFound(file.id.to_string()))?;
        Ok(Box::pin(Cursor::new(entry.data.clone())))
    }

    async fn put_content(&self, source: &mut (dyn AsyncRead + Send + Unpin), file: &FileSourceFile) -> Result<()> {
        let mut data = Vec::new();
        source.read_to_end(&mut data).await.or_raise(|| ErrorKind::transfer("put", &file.id))?;
        let entry = Entry {
            producer_modified: file.producer_modified,
            stored_at: OffsetDateTime::now_utc(),
            owner: self.config.owner.clone(),
            data,
        };
        self.storage.write().await.insert(file.id.clone(), entry);
        Ok(())
    }

    async fn move_file(&self, file: &FileSourceFile, new_id: &FileId) -> Result<FileSourceFile> {
        let mut guard = self.storage.write().await;
        let entry = guard
            .remove(&file.id)
            .ok_or_raise(|| ErrorKind::NotFound(file.id.to_string()))
            .or_raise(|| ErrorKind::transfer("move", &file.id))?;
        let moved = Self::file_info(new_id, &entry);
        guard.insert(new_id.clone(), entry);
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn id(s: &str) -> FileId {
        FileId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let source = MockFileSource::default();
        let file = FileSourceFile::new(id("a/b.txt"), datetime!(2024-01-01 00:00 UTC), "x", 0);
        source.put_content(&mut Cursor::new(b"hello".to_vec()), &file).await.unwrap();
        let found = source.find_file(&id("a/b.txt")).await.unwrap().unwrap();
        assert_eq!(found.size, 5);
        assert_eq!(found.owner, "mock");
        assert_eq!(found.producer_modified, datetime!(2024-01-01 00:00 UTC));
        let mut buffer = Vec::<u8>::new();
        source.get_content(&mut buffer, &found).await.unwrap();
        assert_eq!(buffer, b"hello");
    }

    #[tokio::test]
    async fn test_listing_rules() {
        let source = MockFileSource::with_files([
            ("top.csv", b"1".to_vec()),
            ("a/nested.csv", b"2".to_vec()),
            (".hidden.csv", b"3".to_vec()),
            ("a/.git/x.csv", b"4".to_vec()),
            ("notes.txt", b"5".to_vec()),
        ]);
        let query = FileQuery::all().pattern(r".*\.csv").unwrap();
        let top: Vec<_> = source.find_files(&query).await.unwrap().into_iter().map(|f| f.id.to_string()).collect();
        assert_eq!(top, vec!["top.csv"]);
        let query = query.recursive(true);
        let mut all: Vec<_> = source.find_files(&query).await.unwrap().into_iter().map(|f| f.id.to_string()).collect();
        all.sort();
        assert_eq!(all, vec!["a/nested.csv", "top.csv"]);
    }

    #[tokio::test]
    async fn test_move() {
        let source = MockFileSource::with_files([("old.txt", b"data".to_vec())]);
        let file = source.find_file(&id("old.txt")).await.unwrap().unwrap();
        let moved = source.move_file(&file, &id("archive/old.txt")).await.unwrap();
        assert_eq!(moved.id, id("archive/old.txt"));
        assert!(source.find_file(&id("old.txt")).await.unwrap().is_none());
        let err = source.move_file(&file, &id("again.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transfer { .. }));
    }

    #[tokio::test]
    async fn test_connection_state() {
        let source = MockFileSource::default();
        assert_eq!(source.connection_status().await, ConnectionStatus::Closed);
        source.open_connection().await.unwrap();
        assert_eq!(source.connection_status().await, ConnectionStatus::Open);
        source.close_connection().await.unwrap();
        assert_eq!(source.connection_status().await, ConnectionStatus::Closed);
    }

    #[test]
    #[should_panic(expected = "invalid id")]
    fn test_with_files_panics_on_bad_id() {
        MockFileSource::with_files([("../escape", b"bad".to_vec())]);
    }
}
