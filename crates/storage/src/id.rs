//! File identifiers.
//!
//! A [`FileId`] is the key of a file inside one file source: a relative path
//! that always uses `/` as its separator, whatever the host OS is. Parsing
//! normalizes the input and refuses anything that would escape the root.

use crate::error::{ErrorKind, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Normalized, root-relative, forward-slash separated file identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(String);

impl FileId {
    /// Parse and normalize an identifier.
    ///
    /// Backslashes count as separators, `.` and empty components are dropped
    /// and `..` pops the previous component. Null bytes are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use siphon_storage::FileId;
    /// // Valid ids
    /// assert!(FileId::parse("plant/line-1/2024.csv").is_ok());
    /// assert!(FileId::parse("a/../file.csv").is_ok()); // (never leaves the root)
    /// // Invalid ids
    /// assert!(FileId::parse("../etc/passwd").is_err());
    /// assert!(FileId::parse("a/../../b").is_err());
    /// assert!(FileId::parse("a\0b").is_err());
    /// // Ids get resolved
    /// assert_eq!(
    ///     FileId::parse("wrong/../still-wrong/.././correct//./file.csv/").unwrap().as_str(),
    ///     "correct/file.csv"
    /// );
    /// ```
    pub fn parse(id: impl AsRef<str>) -> Result<Self> {
        let raw = id.as_ref();
        if raw.contains('\0') {
            exn::bail!(ErrorKind::InvalidId(raw.to_string()));
        }
        let mut components: Vec<&str> = Vec::new();
        for component in raw.split(['/', '\\']) {
            match component {
                "" | "." => {},
                ".." => {
                    if components.pop().is_none() {
                        exn::bail!(ErrorKind::InvalidId(raw.to_string()));
                    }
                },
                // Drive letters only mean something on Windows, and mean
                // "escape the root" when they do.
                c if components.is_empty() && c.len() == 2 && c.ends_with(':') => {
                    exn::bail!(ErrorKind::InvalidId(raw.to_string()));
                },
                c => components.push(c),
            }
        }
        match components.is_empty() {
            true => exn::bail!(ErrorKind::InvalidId(raw.to_string())),
            false => Ok(Self(components.join("/"))),
        }
    }

    /// Build an identifier from a relative filesystem path.
    ///
    /// Used by the local backend after stripping its root, so the resulting
    /// id is `/`-separated even on Windows.
    pub fn from_relative_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(s) => match s.to_str() {
                    Some(s) => components.push(s),
                    None => exn::bail!(ErrorKind::InvalidId(path.to_string_lossy().into_owned())),
                },
                Component::CurDir => {},
                _ => exn::bail!(ErrorKind::InvalidId(path.to_string_lossy().into_owned())),
            }
        }
        Self::parse(components.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last component (the base name the file pattern is matched on).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The identifier of the containing "directory", if any.
    pub fn parent(&self) -> Option<FileId> {
        self.0.rsplit_once('/').map(|(parent, _)| Self(parent.to_string()))
    }

    /// Append a relative id under this one.
    pub fn join(&self, child: impl AsRef<str>) -> Result<Self> {
        Self::parse(format!("{}/{}", self.0, child.as_ref()))
    }

    /// `true` if any component is a dotfile/dotdir.
    pub fn is_hidden(&self) -> bool {
        self.0.split('/').any(|c| c.starts_with('.'))
    }

    /// The identifier as a relative [`PathBuf`] for the host OS.
    pub fn to_relative_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for FileId {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
