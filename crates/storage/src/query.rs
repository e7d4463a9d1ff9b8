//! Listing criteria for [`FileSource::find_files()`](crate::FileSource::find_files).

use crate::FileSourceFile;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use regex::Regex;
use std::fmt;

type Predicate = Box<dyn Fn(&FileSourceFile) -> bool + Send + Sync>;

/// What to list, and how deep.
///
/// Hidden entries are never listed, whatever the query says. The name
/// pattern is a regular expression that has to match the *whole* base name
/// of a file (directories are never matched against it); the optional
/// predicate then runs as a second pass over the backend's metadata.
///
/// # Examples
///
/// ```
/// use siphon_storage::FileQuery;
///
/// let query = FileQuery::all()
///     .pattern(r"line-\d+\.csv")
///     .unwrap()
///     .recursive(true)
///     .filter(|file| file.size > 0);
/// assert!(query.matches_name("line-42.csv"));
/// assert!(!query.matches_name("line-42.csv.bak"));
/// ```
#[derive(Default)]
pub struct FileQuery {
    pattern: Option<Regex>,
    recursive: bool,
    filter: Option<Predicate>,
}

impl FileQuery {
    /// Every non-hidden file directly under the root.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict listing to base names fully matching `pattern`. An empty
    /// pattern matches everything.
    pub fn pattern(mut self, pattern: impl AsRef<str>) -> Result<Self> {
        let pattern = pattern.as_ref();
        self.pattern = match pattern.is_empty() {
            true => None,
            false => Some(
                Regex::new(&format!("^(?:{pattern})$")).or_raise(|| ErrorKind::InvalidPattern(pattern.to_string()))?,
            ),
        };
        Ok(self)
    }

    /// Descend into subdirectories (or `/`-delimited key prefixes).
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn filter(mut self, predicate: impl Fn(&FileSourceFile) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(predicate));
        self
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// First pass: does a base name satisfy the pattern?
    pub fn matches_name(&self, name: &str) -> bool {
        self.pattern.as_ref().is_none_or(|re| re.is_match(name))
    }

    /// Second pass: does the backend's metadata satisfy the predicate?
    pub fn accepts(&self, file: &FileSourceFile) -> bool {
        self.filter.as_ref().is_none_or(|predicate| predicate(file))
    }
}

impl fmt::Debug for FileQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileQuery")
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("recursive", &self.recursive)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileId;
    use time::OffsetDateTime;

    #[test]
    fn test_empty_pattern_matches_everything() {
        let query = FileQuery::all().pattern("").unwrap();
        assert!(query.matches_name("anything.bin"));
        assert!(FileQuery::all().matches_name("anything.bin"));
    }

    #[test]
    fn test_pattern_is_anchored() {
        let query = FileQuery::all().pattern(r".*\.csv").unwrap();
        assert!(query.matches_name("data.csv"));
        assert!(!query.matches_name("data.csv.tmp"));
        let query = FileQuery::all().pattern("a|b").unwrap();
        assert!(query.matches_name("a"));
        assert!(!query.matches_name("ab"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = FileQuery::all().pattern("(unclosed").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPattern(_)));
    }

    #[test]
    fn test_filter() {
        let query = FileQuery::all().filter(|f| f.size > 3);
        let small = FileSourceFile::new(FileId::parse("a").unwrap(), OffsetDateTime::UNIX_EPOCH, "o", 1);
        let big = FileSourceFile::new(FileId::parse("b").unwrap(), OffsetDateTime::UNIX_EPOCH, "o", 10);
        assert!(!query.accepts(&small));
        assert!(query.accepts(&big));
        assert!(FileQuery::all().accepts(&small));
    }
}
