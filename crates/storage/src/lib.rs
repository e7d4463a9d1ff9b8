pub mod backend;
mod compare;
pub mod error;
mod file;
mod id;
pub mod mime;
mod models;
mod query;

pub use crate::backend::FileSource;
pub use crate::compare::{ComparisonStatus, FileSourceComparison, SyncAction};
pub use crate::file::FileSourceFile;
pub use crate::id::FileId;
pub use crate::models::{ConnectionStatus, FileSourceConfig};
pub use crate::query::FileQuery;
use std::sync::Arc;

pub type FileSourceHandle = Arc<dyn FileSource + Send + Sync>;
