pub mod archive;
pub mod filesystem;
pub mod permission;
pub mod progress;
pub mod sort;
pub mod text;
pub mod utils;

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use filesystem::{BackendKind, Filesystem};
pub use permission::Permission;
pub use progress::ProgressStream;
pub use text::{FileParams, LineBreak};

/// One addressable object on a backend.
///
/// Entries are immutable values built by a backend while listing or
/// resolving a path. Renaming or moving produces a new entry.
///
/// Equality and hashing consider `uri` only, so two listings of the same
/// directory can be diffed even when sizes or timestamps changed.
/// Field names are serialized as camelCase for the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub uri: String,
    pub backend_id: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch, `0` when unknown.
    pub last_modified: i64,
    pub is_directory: bool,
    pub permissions: Permission,
}

impl FileEntry {
    /// A file entry with unknown metadata.
    pub fn file(uri: impl Into<String>, backend_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            backend_id: backend_id.into(),
            size: 0,
            last_modified: 0,
            is_directory: false,
            permissions: Permission::EMPTY,
        }
    }

    /// A directory entry with unknown metadata.
    pub fn directory(uri: impl Into<String>, backend_id: impl Into<String>) -> Self {
        Self {
            is_directory: true,
            ..Self::file(uri, backend_id)
        }
    }

    /// Last path component; empty for the root.
    pub fn name(&self) -> &str {
        utils::file_name(&self.uri)
    }

    /// Directory entry for the parent path, `None` for the root.
    pub fn parent(&self) -> Option<FileEntry> {
        utils::parent_path(&self.uri).map(|p| FileEntry::directory(p, self.backend_id.clone()))
    }

    /// A child of this entry on the same backend. `is_directory` describes
    /// the child.
    pub fn child(&self, name: &str, is_directory: bool) -> FileEntry {
        let uri = utils::join_path(&self.uri, name);
        if is_directory {
            FileEntry::directory(uri, self.backend_id.clone())
        } else {
            FileEntry::file(uri, self.backend_id.clone())
        }
    }

    /// Same identity with fresh metadata.
    pub fn with_metadata(&self, size: u64, last_modified: i64, permissions: Permission) -> FileEntry {
        FileEntry {
            size,
            last_modified,
            permissions,
            ..self.clone()
        }
    }

    /// `last_modified` as a UTC timestamp, `None` when unknown.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        if self.last_modified <= 0 {
            return None;
        }
        DateTime::from_timestamp_millis(self.last_modified)
    }

    /// Whether the name starts with a dot.
    pub fn is_hidden(&self) -> bool {
        self.name().starts_with('.')
    }

    /// Extension of the name without the dot, lowercased.
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

impl PartialEq for FileEntry {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for FileEntry {}

impl Hash for FileEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}
