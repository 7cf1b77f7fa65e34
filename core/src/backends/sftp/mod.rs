//! SFTP backend over a blocking `ssh2` session.
//!
//! The SSH session and its SFTP channel are opened lazily on first use and
//! reused by later operations. Blocking calls are offloaded to
//! `tokio::task::spawn_blocking` and serialized by the state lock.

pub mod auth;

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ssh2::{ErrorCode, FileStat, OpenFlags, OpenType, Sftp};
use tracing::{info, warn};

use crate::errors::FileError;
use crate::files::progress;
use crate::files::utils::{is_valid_name, is_within, join_path, parent_path, sibling_path};
use crate::files::{text, BackendKind, FileEntry, FileParams, Filesystem, Permission, ProgressStream};
use crate::server::ServerConfig;

use auth::connect_and_authenticate;

// SSH_FX_* status codes from the SFTP protocol.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;
const SFTP_NO_SUCH_PATH: i32 = 10;
const SFTP_FILE_ALREADY_EXISTS: i32 = 11;

// libssh2 session errors that mean the transport is gone.
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

/// State of a connected SFTP session.
struct SftpState {
    _session: ssh2::Session,
    sftp: Sftp,
}

pub struct SftpFilesystem {
    config: ServerConfig,
    timeout: Duration,
    state: Arc<Mutex<Option<SftpState>>>,
}

impl SftpFilesystem {
    pub fn new(config: ServerConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` with the SFTP channel, connecting first if needed. The
    /// session is discarded after a transport failure.
    async fn with_sftp<T, F>(&self, op: F) -> Result<T, FileError>
    where
        F: FnOnce(&Sftp, &str) -> Result<T, FileError> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.state.clone();
        let config = self.config.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().expect("sftp state lock poisoned");
            if guard.is_none() {
                let session = connect_and_authenticate(&config, timeout)?;
                session.set_blocking(true);
                let sftp = session
                    .sftp()
                    .map_err(|e| map_ssh_error(e, "sftp subsystem"))?;
                info!("SFTP session opened to {}", config.socket_address());
                *guard = Some(SftpState {
                    _session: session,
                    sftp,
                });
            }
            let sftp_state = guard
                .as_ref()
                .ok_or_else(|| FileError::ConnectionFailed("SFTP not connected".to_string()))?;
            let result = op(&sftp_state.sftp, &config.uuid);
            if matches!(result, Err(FileError::ConnectionFailed(_))) {
                warn!("Dropping broken SFTP session to {}", config.socket_address());
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| FileError::OperationFailed(format!("Task join failed: {e}")))?
    }
}

fn map_ssh_error(err: ssh2::Error, path: &str) -> FileError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH) => {
            FileError::NotFound(path.to_string())
        }
        ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => FileError::PermissionDenied(path.to_string()),
        ErrorCode::SFTP(SFTP_FILE_ALREADY_EXISTS) => FileError::AlreadyExists(path.to_string()),
        ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND
            | LIBSSH2_ERROR_TIMEOUT
            | LIBSSH2_ERROR_SOCKET_DISCONNECT
            | LIBSSH2_ERROR_SOCKET_RECV,
        ) => FileError::ConnectionFailed(format!("{path}: {err}")),
        _ => FileError::OperationFailed(format!("{path}: {err}")),
    }
}

fn entry_from_stat(path: &str, stat: &FileStat, backend_id: &str) -> FileEntry {
    FileEntry {
        uri: path.to_string(),
        backend_id: backend_id.to_string(),
        size: if stat.is_dir() { 0 } else { stat.size.unwrap_or(0) },
        last_modified: stat.mtime.map(|t| t as i64 * 1000).unwrap_or(0),
        is_directory: stat.is_dir(),
        permissions: stat.perm.map(Permission::from_mode).unwrap_or(Permission::EMPTY),
    }
}

fn stat_sync(sftp: &Sftp, path: &str, backend_id: &str) -> Result<FileEntry, FileError> {
    let stat = sftp
        .stat(Path::new(path))
        .map_err(|e| map_ssh_error(e, path))?;
    Ok(entry_from_stat(path, &stat, backend_id))
}

fn exists_sync(sftp: &Sftp, path: &str) -> Result<bool, FileError> {
    match sftp.lstat(Path::new(path)) {
        Ok(_) => Ok(true),
        Err(e) => match map_ssh_error(e, path) {
            FileError::NotFound(_) => Ok(false),
            other => Err(other),
        },
    }
}

fn list_sync(sftp: &Sftp, dir: &str, backend_id: &str) -> Result<Vec<FileEntry>, FileError> {
    let entries = sftp
        .readdir(Path::new(dir))
        .map_err(|e| map_ssh_error(e, dir))?;
    let mut result = Vec::new();
    for (pathbuf, stat) in entries {
        let name = pathbuf
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }
        result.push(entry_from_stat(&join_path(dir, &name), &stat, backend_id));
    }
    Ok(result)
}

fn mkdir_parents(sftp: &Sftp, path: &str) -> Result<(), FileError> {
    let mut missing = Vec::new();
    let mut current = parent_path(path);
    while let Some(dir) = current {
        if exists_sync(sftp, &dir)? {
            break;
        }
        current = parent_path(&dir);
        missing.push(dir);
    }
    for dir in missing.into_iter().rev() {
        sftp.mkdir(Path::new(&dir), 0o755)
            .map_err(|e| map_ssh_error(e, &dir))?;
    }
    Ok(())
}

fn delete_sync(sftp: &Sftp, entry: &FileEntry) -> Result<(), FileError> {
    if entry.is_directory {
        for child in list_sync(sftp, &entry.uri, &entry.backend_id)? {
            delete_sync(sftp, &child)?;
        }
        sftp.rmdir(Path::new(&entry.uri))
            .map_err(|e| map_ssh_error(e, &entry.uri))
    } else {
        sftp.unlink(Path::new(&entry.uri))
            .map_err(|e| map_ssh_error(e, &entry.uri))
    }
}

/// Exclusive create, failing with `AlreadyExists` if the file is present.
fn create_new(sftp: &Sftp, path: &str, mode: i32) -> Result<ssh2::File, FileError> {
    sftp.open_mode(
        Path::new(path),
        OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE,
        mode,
        OpenType::File,
    )
    .map_err(|e| map_ssh_error(e, path))
}

fn copy_sync(sftp: &Sftp, source: &FileEntry, target: &str) -> Result<(), FileError> {
    let mode = if source.permissions.is_empty() {
        None
    } else {
        Some(source.permissions.mode() as i32)
    };
    if source.is_directory {
        sftp.mkdir(Path::new(target), mode.unwrap_or(0o755))
            .map_err(|e| map_ssh_error(e, target))?;
        for child in list_sync(sftp, &source.uri, &source.backend_id)? {
            copy_sync(sftp, &child, &join_path(target, child.name()))?;
        }
        Ok(())
    } else {
        let mut from = sftp
            .open(Path::new(&source.uri))
            .map_err(|e| map_ssh_error(e, &source.uri))?;
        let mut to = create_new(sftp, target, mode.unwrap_or(0o644))?;
        io::copy(&mut from, &mut to).map_err(|e| FileError::from_io(e, target))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Filesystem for SftpFilesystem {
    fn backend_id(&self) -> &str {
        &self.config.uuid
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote(self.config.scheme)
    }

    async fn default_location(&self) -> Result<FileEntry, FileError> {
        let initial = self.config.initial_dir.clone();
        self.with_sftp(move |sftp, id| {
            let dir = if initial.is_empty() {
                let home = sftp
                    .realpath(Path::new("."))
                    .map_err(|e| map_ssh_error(e, "."))?;
                home.to_string_lossy().to_string()
            } else {
                initial
            };
            stat_sync(sftp, &dir, id)
        })
        .await
    }

    async fn ping(&self) -> Result<(), FileError> {
        self.with_sftp(|sftp, _| {
            sftp.realpath(Path::new("."))
                .map(|_| ())
                .map_err(|e| map_ssh_error(e, "."))
        })
        .await
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, FileError> {
        let path = path.to_string();
        self.with_sftp(move |sftp, id| stat_sync(sftp, &path, id)).await
    }

    async fn list_files(&self, parent: &FileEntry) -> Result<Vec<FileEntry>, FileError> {
        let dir = parent.uri.clone();
        self.with_sftp(move |sftp, id| list_sync(sftp, &dir, id)).await
    }

    async fn create_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let entry = entry.clone();
        self.with_sftp(move |sftp, _| {
            if exists_sync(sftp, &entry.uri)? {
                return Err(FileError::AlreadyExists(entry.uri.clone()));
            }
            mkdir_parents(sftp, &entry.uri)?;
            if entry.is_directory {
                sftp.mkdir(Path::new(&entry.uri), 0o755)
                    .map_err(|e| map_ssh_error(e, &entry.uri))
            } else {
                create_new(sftp, &entry.uri, 0o644).map(|_| ())
            }
        })
        .await
    }

    async fn delete_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let path = entry.uri.clone();
        self.with_sftp(move |sftp, id| {
            let stat = sftp
                .lstat(Path::new(&path))
                .map_err(|e| map_ssh_error(e, &path))?;
            delete_sync(sftp, &entry_from_stat(&path, &stat, id))
        })
        .await
    }

    async fn rename_file(&self, entry: &FileEntry, new_name: &str) -> Result<FileEntry, FileError> {
        if !is_valid_name(new_name) {
            return Err(FileError::OperationFailed(format!("invalid name '{new_name}'")));
        }
        let from = entry.uri.clone();
        let to = sibling_path(&entry.uri, new_name);
        self.with_sftp(move |sftp, id| {
            if exists_sync(sftp, &to)? {
                return Err(FileError::AlreadyExists(to));
            }
            sftp.rename(Path::new(&from), Path::new(&to), None)
                .map_err(|e| map_ssh_error(e, &from))?;
            stat_sync(sftp, &to, id)
        })
        .await
    }

    async fn copy_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        if is_within(&destination.uri, &source.uri) {
            return Err(FileError::OperationFailed(format!(
                "cannot copy {} into itself",
                source.uri
            )));
        }
        let source_path = source.uri.clone();
        let target = join_path(&destination.uri, source.name());
        self.with_sftp(move |sftp, id| {
            let resolved = stat_sync(sftp, &source_path, id)?;
            if exists_sync(sftp, &target)? {
                return Err(FileError::AlreadyExists(target));
            }
            copy_sync(sftp, &resolved, &target)
        })
        .await
    }

    async fn move_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        let from = source.uri.clone();
        let target = join_path(&destination.uri, source.name());
        self.with_sftp(move |sftp, _| {
            if exists_sync(sftp, &target)? {
                return Err(FileError::AlreadyExists(target));
            }
            sftp.rename(Path::new(&from), Path::new(&target), None)
                .map_err(|e| map_ssh_error(e, &from))
        })
        .await
    }

    fn compress_files(&self, _sources: Vec<FileEntry>, _destination: FileEntry) -> ProgressStream {
        progress::failed(FileError::Unsupported("compress over sftp".to_string()))
    }

    fn extract_files(&self, _source: FileEntry, _destination: FileEntry) -> ProgressStream {
        progress::failed(FileError::Unsupported("extract over sftp".to_string()))
    }

    async fn load_file(&self, entry: &FileEntry, params: &FileParams) -> Result<String, FileError> {
        let path = entry.uri.clone();
        let bytes = self
            .with_sftp(move |sftp, _| {
                let mut remote = sftp
                    .open(Path::new(&path))
                    .map_err(|e| map_ssh_error(e, &path))?;
                let mut data = Vec::new();
                remote
                    .read_to_end(&mut data)
                    .map_err(|e| FileError::from_io(e, &path))?;
                Ok(data)
            })
            .await?;
        text::decode(&bytes, params)
    }

    async fn save_file(
        &self,
        entry: &FileEntry,
        text: &str,
        params: &FileParams,
    ) -> Result<(), FileError> {
        let bytes = text::encode(text, params)?;
        let path = entry.uri.clone();
        self.with_sftp(move |sftp, _| {
            let mut remote = sftp
                .create(Path::new(&path))
                .map_err(|e| map_ssh_error(e, &path))?;
            remote
                .write_all(&bytes)
                .map_err(|e| FileError::from_io(e, &path))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Scheme;

    fn stat(size: u64, perm: u32, mtime: u64) -> FileStat {
        FileStat {
            size: Some(size),
            uid: None,
            gid: None,
            perm: Some(perm),
            atime: None,
            mtime: Some(mtime),
        }
    }

    #[test]
    fn entry_from_stat_file() {
        let entry = entry_from_stat("/home/dev/a.txt", &stat(12, 0o100640, 1_700_000_000), "srv-1");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, 12);
        assert_eq!(entry.last_modified, 1_700_000_000_000);
        assert_eq!(entry.permissions.mode(), 0o640);
        assert_eq!(entry.backend_id, "srv-1");
    }

    #[test]
    fn entry_from_stat_directory_has_zero_size() {
        let entry = entry_from_stat("/home/dev", &stat(4096, 0o040755, 0), "srv-1");
        assert!(entry.is_directory);
        assert_eq!(entry.size, 0);
        assert_eq!(entry.last_modified, 0);
    }

    #[test]
    fn status_codes_map_to_file_errors() {
        let err = ssh2::Error::new(ErrorCode::SFTP(SFTP_NO_SUCH_FILE), "no such file");
        assert_eq!(map_ssh_error(err, "/x"), FileError::NotFound("/x".into()));

        let err = ssh2::Error::new(ErrorCode::SFTP(SFTP_PERMISSION_DENIED), "denied");
        assert_eq!(map_ssh_error(err, "/x"), FileError::PermissionDenied("/x".into()));

        let err = ssh2::Error::new(ErrorCode::SFTP(SFTP_FILE_ALREADY_EXISTS), "exists");
        assert_eq!(map_ssh_error(err, "/x"), FileError::AlreadyExists("/x".into()));

        let err = ssh2::Error::new(ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV), "recv");
        assert!(map_ssh_error(err, "/x").is_retryable());
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_failed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = ServerConfig::new(Scheme::Sftp, "dead", "127.0.0.1", "user").with_secret("pw");
        config.port = port;
        let fs_ = SftpFilesystem::new(config, Duration::from_secs(2));
        assert!(matches!(fs_.ping().await, Err(FileError::ConnectionFailed(_))));
        assert_eq!(fs_.kind(), BackendKind::Remote(Scheme::Sftp));
    }

    #[tokio::test]
    async fn copy_into_itself_is_refused_before_connecting() {
        let config = ServerConfig::new(Scheme::Sftp, "s", "example.invalid", "u").with_secret("pw");
        let fs_ = SftpFilesystem::new(config, Duration::from_secs(1));
        let source = FileEntry::directory("/data/a", "s");

        for dest in ["/data/a", "/data/a/sub"] {
            let err = fs_
                .copy_file(&source, &FileEntry::directory(dest, "s"))
                .await
                .unwrap_err();
            assert!(matches!(err, FileError::OperationFailed(_)), "{dest}: {err:?}");
        }
    }
}
