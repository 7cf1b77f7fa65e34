//! The uniform capability contract implemented by every storage backend.

use std::fmt;

use crate::errors::FileError;
use crate::server::Scheme;

use super::progress::ProgressStream;
use super::{FileEntry, FileParams};

/// Which transport a [`Filesystem`] speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Root,
    Remote(Scheme),
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Root => write!(f, "root"),
            BackendKind::Remote(scheme) => write!(f, "{scheme}"),
        }
    }
}

/// Async file operations over one storage transport.
///
/// Every method may block on disk or network I/O for an unbounded time, so
/// callers run them inside a [`TaskManager`](crate::tasks::TaskManager)
/// submission. Methods other than `ping`, `stat`, `exists`, `list_files`
/// and `load_file` mutate backend state.
///
/// Uses `#[async_trait]` so the factory can hand out `Arc<dyn Filesystem>`.
#[async_trait::async_trait]
pub trait Filesystem: Send + Sync {
    /// The id the factory resolved this backend from.
    fn backend_id(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Directory a file explorer should open first.
    async fn default_location(&self) -> Result<FileEntry, FileError>;

    /// Cheap reachability and authentication check.
    async fn ping(&self) -> Result<(), FileError>;

    /// Resolve a path to an entry with full metadata.
    async fn stat(&self, path: &str) -> Result<FileEntry, FileError>;

    async fn exists(&self, entry: &FileEntry) -> Result<bool, FileError> {
        match self.stat(&entry.uri).await {
            Ok(_) => Ok(true),
            Err(FileError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Direct children of `parent`, in backend order. Never recursive.
    async fn list_files(&self, parent: &FileEntry) -> Result<Vec<FileEntry>, FileError>;

    /// Create `entry` as a directory or an empty file. Missing parents are
    /// created.
    async fn create_file(&self, entry: &FileEntry) -> Result<(), FileError>;

    /// Delete `entry`, recursively for directories.
    async fn delete_file(&self, entry: &FileEntry) -> Result<(), FileError>;

    /// Rename `entry` within its directory and return the renamed entry.
    async fn rename_file(&self, entry: &FileEntry, new_name: &str) -> Result<FileEntry, FileError>;

    /// Copy `source` into the directory `destination`, keeping its name.
    async fn copy_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError>;

    /// Move `source` into the directory `destination`.
    async fn move_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        self.copy_file(source, destination).await?;
        self.delete_file(source).await
    }

    /// Archive `sources` into the gzip-compressed tarball `destination`,
    /// yielding each source once it is archived.
    fn compress_files(&self, sources: Vec<FileEntry>, destination: FileEntry) -> ProgressStream;

    /// Unpack the tarball `source` into the directory `destination`,
    /// yielding each extracted member.
    fn extract_files(&self, source: FileEntry, destination: FileEntry) -> ProgressStream;

    /// Read the whole file as text.
    async fn load_file(&self, entry: &FileEntry, params: &FileParams) -> Result<String, FileError>;

    /// Replace the file's content with `text`.
    async fn save_file(
        &self,
        entry: &FileEntry,
        text: &str,
        params: &FileParams,
    ) -> Result<(), FileError>;
}
