//! Host filesystem backend.
//!
//! Every operation runs `std::fs` calls on the blocking pool. Instances hold
//! no session state and are safe to share between tasks.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::errors::FileError;
use crate::files::utils::{epoch_millis, is_valid_name, normalize_path_separators, sibling_path};
use crate::files::{archive, text, BackendKind, FileEntry, FileParams, Filesystem, Permission, ProgressStream};

/// Reserved backend id of the host filesystem.
pub const LOCAL_BACKEND_ID: &str = "local";

pub struct LocalFilesystem {
    backend_id: String,
}

impl LocalFilesystem {
    pub fn new() -> Self {
        Self {
            backend_id: LOCAL_BACKEND_ID.to_string(),
        }
    }
}

impl Default for LocalFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an entry from host metadata.
pub(crate) fn entry_from_metadata(path: &Path, metadata: &fs::Metadata, backend_id: &str) -> FileEntry {
    FileEntry {
        uri: normalize_path_separators(&path.to_string_lossy()),
        backend_id: backend_id.to_string(),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        last_modified: metadata.modified().map(epoch_millis).unwrap_or(0),
        is_directory: metadata.is_dir(),
        permissions: permissions(metadata),
    }
}

#[cfg(unix)]
fn permissions(metadata: &fs::Metadata) -> Permission {
    use std::os::unix::fs::PermissionsExt;
    Permission::from_mode(metadata.permissions().mode())
}

/// Only the read-only flag is available off Unix; report it as owner bits.
#[cfg(not(unix))]
fn permissions(metadata: &fs::Metadata) -> Permission {
    if metadata.permissions().readonly() {
        Permission::OWNER_READ
    } else {
        Permission::OWNER_READ | Permission::OWNER_WRITE
    }
}

fn stat_sync(path: &str, backend_id: &str) -> Result<FileEntry, FileError> {
    let p = Path::new(path);
    let metadata = fs::metadata(p).map_err(|e| FileError::from_io(e, path))?;
    Ok(entry_from_metadata(p, &metadata, backend_id))
}

/// List directory contents, filtering out `.` and `..`.
pub(crate) fn list_dir_sync(path: &str, backend_id: &str) -> Result<Vec<FileEntry>, FileError> {
    let map = |e: io::Error| FileError::from_io(e, path);
    let dir = Path::new(path);
    if !fs::metadata(dir).map_err(map)?.is_dir() {
        return Err(FileError::OperationFailed(format!("{path}: not a directory")));
    }

    let mut result = Vec::new();
    for entry in fs::read_dir(dir).map_err(map)? {
        let entry = entry.map_err(map)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "." || name == ".." {
            continue;
        }
        // Follow symlinks; fall back to the link itself when dangling.
        let entry_path = entry.path();
        let metadata = match fs::metadata(&entry_path) {
            Ok(m) => m,
            Err(_) => entry.metadata().map_err(map)?,
        };
        result.push(entry_from_metadata(&entry_path, &metadata, backend_id));
    }
    Ok(result)
}

fn create_sync(entry: &FileEntry) -> Result<(), FileError> {
    let path = Path::new(&entry.uri);
    if path.exists() {
        return Err(FileError::AlreadyExists(entry.uri.clone()));
    }
    if entry.is_directory {
        fs::create_dir_all(path).map_err(|e| FileError::from_io(e, &entry.uri))
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FileError::from_io(e, &entry.uri))?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map(|_| ())
            .map_err(|e| FileError::from_io(e, &entry.uri))
    }
}

fn delete_sync(path: &str) -> Result<(), FileError> {
    let p = Path::new(path);
    let metadata = fs::symlink_metadata(p).map_err(|e| FileError::from_io(e, path))?;
    if metadata.is_dir() {
        fs::remove_dir_all(p)
    } else {
        fs::remove_file(p)
    }
    .map_err(|e| FileError::from_io(e, path))
}

/// Recursively copy `from` to the not-yet-existing path `to`.
fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if fs::metadata(from)?.is_dir() {
        fs::create_dir(to)?;
        for child in fs::read_dir(from)? {
            let child = child?;
            copy_recursive(&child.path(), &to.join(child.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

fn copy_sync(source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
    let from = Path::new(&source.uri);
    if !from.exists() {
        return Err(FileError::NotFound(source.uri.clone()));
    }
    let dest_dir = Path::new(&destination.uri);
    if !dest_dir.is_dir() {
        return Err(FileError::NotFound(destination.uri.clone()));
    }
    let target = dest_dir.join(source.name());
    if target.exists() {
        return Err(FileError::AlreadyExists(
            normalize_path_separators(&target.to_string_lossy()),
        ));
    }
    if dest_dir.starts_with(from) {
        return Err(FileError::OperationFailed(format!(
            "cannot copy {} into itself",
            source.uri
        )));
    }
    copy_recursive(from, &target).map_err(|e| FileError::from_io(e, &source.uri))
}

/// Run a blocking closure on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, FileError>
where
    F: FnOnce() -> Result<T, FileError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FileError::OperationFailed(format!("Task join failed: {e}")))?
}

#[async_trait::async_trait]
impl Filesystem for LocalFilesystem {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn default_location(&self) -> Result<FileEntry, FileError> {
        let home = dirs::home_dir()
            .ok_or_else(|| FileError::NotFound("home directory".to_string()))?;
        self.stat(&home.to_string_lossy()).await
    }

    async fn ping(&self) -> Result<(), FileError> {
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, FileError> {
        let path = path.to_string();
        let backend_id = self.backend_id.clone();
        blocking(move || stat_sync(&path, &backend_id)).await
    }

    async fn list_files(&self, parent: &FileEntry) -> Result<Vec<FileEntry>, FileError> {
        let path = parent.uri.clone();
        let backend_id = self.backend_id.clone();
        blocking(move || list_dir_sync(&path, &backend_id)).await
    }

    async fn create_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let entry = entry.clone();
        blocking(move || create_sync(&entry)).await
    }

    async fn delete_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let path = entry.uri.clone();
        blocking(move || delete_sync(&path)).await
    }

    async fn rename_file(&self, entry: &FileEntry, new_name: &str) -> Result<FileEntry, FileError> {
        if !is_valid_name(new_name) {
            return Err(FileError::OperationFailed(format!("invalid name '{new_name}'")));
        }
        let from = entry.uri.clone();
        let to = sibling_path(&entry.uri, new_name);
        let backend_id = self.backend_id.clone();
        blocking(move || {
            if Path::new(&to).exists() {
                return Err(FileError::AlreadyExists(to));
            }
            fs::rename(&from, &to).map_err(|e| FileError::from_io(e, &from))?;
            debug!("Renamed {from} -> {to}");
            stat_sync(&to, &backend_id)
        })
        .await
    }

    async fn copy_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        let source = source.clone();
        let destination = destination.clone();
        blocking(move || copy_sync(&source, &destination)).await
    }

    async fn move_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        let source = source.clone();
        let destination = destination.clone();
        blocking(move || {
            let target = Path::new(&destination.uri).join(source.name());
            if target.exists() {
                return Err(FileError::AlreadyExists(
                    normalize_path_separators(&target.to_string_lossy()),
                ));
            }
            // Cheap rename first; fall back to copy + delete across devices.
            match fs::rename(&source.uri, &target) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(FileError::from_io(e, &source.uri))
                }
                Err(_) => {
                    copy_sync(&source, &destination)?;
                    delete_sync(&source.uri)
                }
            }
        })
        .await
    }

    fn compress_files(&self, sources: Vec<FileEntry>, destination: FileEntry) -> ProgressStream {
        archive::compress(sources, destination)
    }

    fn extract_files(&self, source: FileEntry, destination: FileEntry) -> ProgressStream {
        archive::extract(source, destination)
    }

    async fn load_file(&self, entry: &FileEntry, params: &FileParams) -> Result<String, FileError> {
        let path = entry.uri.clone();
        let params = params.clone();
        blocking(move || {
            let bytes = fs::read(&path).map_err(|e| FileError::from_io(e, &path))?;
            text::decode(&bytes, &params)
        })
        .await
    }

    async fn save_file(
        &self,
        entry: &FileEntry,
        text: &str,
        params: &FileParams,
    ) -> Result<(), FileError> {
        let bytes = text::encode(text, params)?;
        let path = entry.uri.clone();
        blocking(move || {
            let p = Path::new(&path);
            if let Some(parent) = p.parent() {
                fs::create_dir_all(parent).map_err(|e| FileError::from_io(e, &path))?;
            }
            fs::write(p, bytes).map_err(|e| FileError::from_io(e, &path))
        })
        .await
    }
}
