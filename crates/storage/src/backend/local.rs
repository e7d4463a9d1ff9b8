//! Local filesystem file source.
//!
//! Files live under a configured root directory and are accessed with
//! `tokio::fs`. Ids are paths relative to that root, always `/`-separated.

use crate::backend::{BoxAsyncRead, FileStream};
use crate::error::{ErrorKind, Result};
use crate::mime::{self, SNIFF_LEN};
use crate::{ConnectionStatus, FileId, FileQuery, FileSource, FileSourceConfig, FileSourceFile};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::OffsetDateTime;
use tokio::fs::{self, DirEntry};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

enum WalkEntry {
    File(FileSourceFile),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem file source.
///
/// Both `producer_modified` and `source_modified` are the filesystem's mtime;
/// local disk can't tell "produced" from "stored" apart. Writes set the mtime
/// to the incoming file's producer date so comparisons survive a round trip.
///
/// # Examples
///
/// ```no_run
/// use siphon_storage::{FileSourceConfig, backend::LocalFileSource};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = LocalFileSource::new("outbox", FileSourceConfig::new("/data/outbox", "plant-a"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    name: String,
    config: FileSourceConfig,
    root: PathBuf,
}
impl LocalFileSource {
    /// Create a new local file source rooted at `config.location`.
    ///
    /// # Errors
    ///
    /// Returns a [`Configuration`](ErrorKind::Configuration) error if the
    /// location isn't absolute, isn't a directory, can't be created, or
    /// isn't writable.
    pub fn new(name: impl Into<String>, config: FileSourceConfig) -> Result<Self> {
        let root = PathBuf::from(&config.location);
        if !root.is_absolute() {
            exn::bail!(ErrorKind::Configuration(format!("root `{}` is not an absolute path", root.display())));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::Configuration(format!("root `{}` is not a directory", root.display())));
            }
        } else {
            // Use non-async here; it only happens once on construction
            // and it's not worth the hassle of making the constructor async.
            sync_create_dir(&root)
                .or_raise(|| ErrorKind::Configuration(format!("cannot create root `{}`", root.display())))?;
        }
        Self::probe_writable(&root)?;
        Ok(Self { name: name.into(), config, root })
    }

    /// Permission bits lie (ACLs, read-only mounts); actually write something.
    fn probe_writable(root: &Path) -> Result<()> {
        let probe = root.join(format!(".siphon-probe-{}", std::process::id()));
        std::fs::write(&probe, b"")
            .or_raise(|| ErrorKind::Configuration(format!("root `{}` is not writable", root.display())))?;
        if let Err(e) = std::fs::remove_file(&probe) {
            tracing::warn!(probe = %probe.display(), error = %e, "Could not remove write probe");
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, id: &FileId) -> PathBuf {
        self.root.join(id.to_relative_path())
    }

    /// Convert an absolute path back to a file id.
    fn relative_id(&self, absolute: &Path) -> Result<FileId> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::Backend(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        FileId::from_relative_path(relative)
    }

    /// Re-use the same metadata collection for both listing and lookups.
    async fn describe(&self, id: FileId, absolute: &Path, metadata: &Metadata) -> Result<FileSourceFile> {
        let modified: OffsetDateTime = metadata.modified().map_err(ErrorKind::Io)?.into();
        let mime_type = Self::sniff(absolute).await;
        Ok(FileSourceFile::new(id, modified, &self.config.owner, metadata.len()).with_mime_type(mime_type))
    }

    /// Sniffing is best-effort: any failure means "unknown", never an error.
    async fn sniff(absolute: &Path) -> Option<&'static str> {
        let file = match fs::File::open(absolute).await {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %absolute.display(), error = %e, "Could not open file for mime sniffing");
                return None;
            },
        };
        let mut head = Vec::with_capacity(SNIFF_LEN);
        if let Err(e) = file.take(SNIFF_LEN as u64).read_to_end(&mut head).await {
            tracing::debug!(path = %absolute.display(), error = %e, "Could not read file for mime sniffing");
            return None;
        }
        mime::sniff(&head)
    }

    fn map_io_error(e: std::io::Error, id: &FileId) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(id.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(id.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    fn is_hidden(entry: &DirEntry, metadata: &Metadata) -> bool {
        entry.file_name().to_string_lossy().starts_with('.') || has_hidden_attribute(metadata)
    }

    /// Classify one directory entry. Entries that vanish between `read_dir`
    /// and `metadata` are skipped.
    async fn process_entry(&self, entry: DirEntry, query: &FileQuery) -> Result<WalkEntry> {
        let path = entry.path();
        let mut metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WalkEntry::Skip),
            Err(e) => return Err(ErrorKind::Io(e).into()),
        };
        if Self::is_hidden(&entry, &metadata) {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_dir() {
            return Ok(match query.is_recursive() {
                true => WalkEntry::Descend(path),
                false => WalkEntry::Skip,
            });
        }
        // Follow symlinks to files, but never to directories (no cycles).
        if metadata.is_symlink() {
            metadata = match fs::metadata(&path).await {
                Ok(target) if target.is_file() => target,
                // Broken or directory symlink; drop it.
                _ => return Ok(WalkEntry::Skip),
            };
        }
        if !metadata.is_file() || !query.matches_name(&entry.file_name().to_string_lossy()) {
            return Ok(WalkEntry::Skip);
        }
        let id = self.relative_id(&path)?;
        Ok(WalkEntry::File(self.describe(id, &path, &metadata).await?))
    }
}

#[cfg(windows)]
fn has_hidden_attribute(metadata: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
fn has_hidden_attribute(_metadata: &Metadata) -> bool {
    false
}

/// Write to `partial`, stamp its mtime, then move it over `target`.
async fn write_atomically(
    source: &mut (dyn AsyncRead + Send + Unpin),
    partial: &Path,
    target: &Path,
    mtime: SystemTime,
) -> std::io::Result<u64> {
    let mut out = fs::File::create(partial).await?;
    let bytes = tokio::io::copy(source, &mut out).await?;
    out.flush().await?;
    out.sync_all().await?;
    let out = out.into_std().await;
    tokio::task::spawn_blocking(move || out.set_modified(mtime)).await.map_err(std::io::Error::other)??;
    fs::rename(partial, target).await?;
    Ok(bytes)
}

#[async_trait]
impl FileSource for LocalFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &FileSourceConfig {
        &self.config
    }

    // Local disk is connectionless; writability was checked in `new()`.
    async fn open_connection(&self) -> Result<ConnectionStatus> {
        tracing::debug!(source = %self.name, root = %self.root.display(), "Opened local file source");
        Ok(ConnectionStatus::Open)
    }

    async fn close_connection(&self) -> Result<ConnectionStatus> {
        Ok(ConnectionStatus::Closed)
    }

    async fn find_file(&self, id: &FileId) -> Result<Option<FileSourceFile>> {
        let path = self.absolute_path(id);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(self.describe(id.clone(), &path, &metadata).await?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(e, id).into()),
        }
    }

    fn scan<'a>(&'a self, query: &'a FileQuery) -> FileStream<'a> {
        let mut stack = vec![self.root.clone()];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // A directory removed mid-listing yields fewer results,
                    // not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue 'dirs,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::Io(err)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => break 'entries,
                        Err(err) => { yield Err(exn::Exn::from(ErrorKind::Io(err))); continue 'entries; },
                    };
                    match self.process_entry(entry, query).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn get_input_stream(&self, file: &FileSourceFile) -> Result<BoxAsyncRead> {
        let path = self.absolute_path(&file.id);
        match fs::File::open(&path).await {
            Ok(handle) => Ok(Box::pin(handle)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(file.id.to_string())),
            Err(e) => Err(e).or_raise(|| ErrorKind::transfer("get", &file.id)),
        }
    }

    #[instrument(skip(self, source, file), fields(source_name = %self.name, id = %file.id))]
    async fn put_content(&self, source: &mut (dyn AsyncRead + Send + Unpin), file: &FileSourceFile) -> Result<()> {
        let target = self.absolute_path(&file.id);
        // `root.join(id)` always has a parent.
        let parent = target.parent().unwrap_or(&self.root);
        // Create parent directories if needed, to keep behaviour
        // consistent with S3-compatible storage.
        fs::create_dir_all(parent).await.or_raise(|| ErrorKind::transfer("put", &file.id))?;
        // Dot-prefixed so a concurrent listing never picks it up.
        let partial = parent.join(format!(".{}.part", file.id.file_name()));
        let mtime = SystemTime::from(file.producer_modified);
        match write_atomically(source, &partial, &target, mtime).await {
            Ok(bytes) => {
                tracing::debug!(bytes, "Wrote file");
                Ok(())
            },
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(partial = %partial.display(), error = %cleanup, "Could not remove partial file");
                }
                Err(e).or_raise(|| ErrorKind::transfer("put", &file.id))
            },
        }
    }

    #[instrument(skip(self, file), fields(source_name = %self.name, from = %file.id, to = %new_id))]
    async fn move_file(&self, file: &FileSourceFile, new_id: &FileId) -> Result<FileSourceFile> {
        let from = self.absolute_path(&file.id);
        let to = self.absolute_path(new_id);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await.or_raise(|| ErrorKind::transfer("move", &file.id))?;
        }
        // rename(2) replaces an existing target atomically.
        fs::rename(&from, &to).await.or_raise(|| ErrorKind::transfer("move", &file.id))?;
        tracing::debug!("Moved file");
        self.find_file(new_id).await?.ok_or_raise(|| ErrorKind::NotFound(new_id.to_string()))
    }
}
