//! FTP backend covering plain FTP, implicit TLS (FTPS) and explicit TLS
//! (FTPES).
//!
//! One control connection is opened lazily on first use and reused by later
//! operations. suppaftp is a blocking client, so every operation runs on the
//! blocking pool while holding the session lock; operations on one instance
//! therefore execute one at a time.

use std::io::Cursor;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use suppaftp::list::{File as ListEntry, PosixPexQuery};
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};
use tracing::{debug, info, warn};

use crate::errors::FileError;
use crate::files::progress;
use crate::files::utils::{
    epoch_millis, is_valid_name, is_within, join_path, parent_path, sibling_path,
};
use crate::files::{text, BackendKind, FileEntry, FileParams, Filesystem, Permission, ProgressStream};
use crate::server::{Scheme, ServerConfig};

/// How the control connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpSecurity {
    None,
    /// TLS from the first byte.
    Implicit,
    /// Plain connect, then `AUTH TLS`.
    Explicit,
}

impl FtpSecurity {
    pub fn for_scheme(scheme: Scheme) -> Option<Self> {
        match scheme {
            Scheme::Ftp => Some(FtpSecurity::None),
            Scheme::Ftps => Some(FtpSecurity::Implicit),
            Scheme::Ftpes => Some(FtpSecurity::Explicit),
            Scheme::Sftp => None,
        }
    }
}

type Session = Arc<Mutex<Option<NativeTlsFtpStream>>>;

pub struct FtpFilesystem {
    config: ServerConfig,
    security: FtpSecurity,
    timeout: Duration,
    accept_invalid_certs: bool,
    session: Session,
}

impl FtpFilesystem {
    pub fn new(config: ServerConfig, security: FtpSecurity, timeout: Duration) -> Self {
        Self {
            config,
            security,
            timeout,
            accept_invalid_certs: false,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Trust self-signed or otherwise unverifiable server certificates.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Run `op` against the session, connecting first if needed. A broken
    /// connection is discarded so the next call reconnects.
    async fn with_session<T, F>(&self, op: F) -> Result<T, FileError>
    where
        F: FnOnce(&mut NativeTlsFtpStream) -> Result<T, FileError> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.session.clone();
        let config = self.config.clone();
        let security = self.security;
        let timeout = self.timeout;
        let accept_invalid_certs = self.accept_invalid_certs;
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().expect("ftp session lock poisoned");
            if guard.is_none() {
                *guard = Some(open_session(&config, security, timeout, accept_invalid_certs)?);
            }
            let stream = guard
                .as_mut()
                .ok_or_else(|| FileError::ConnectionFailed("FTP not connected".to_string()))?;
            let result = op(stream);
            if matches!(result, Err(FileError::ConnectionFailed(_))) {
                warn!("Dropping broken FTP session to {}", config.socket_address());
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| FileError::OperationFailed(format!("Task join failed: {e}")))?
    }
}

fn tls_connector(accept_invalid_certs: bool) -> Result<NativeTlsConnector, FileError> {
    TlsConnector::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map(NativeTlsConnector::from)
        .map_err(|e| FileError::ConnectionFailed(format!("TLS setup failed: {e}")))
}

fn resolve(config: &ServerConfig) -> Result<SocketAddr, FileError> {
    let address = config.socket_address();
    address
        .to_socket_addrs()
        .map_err(|e| FileError::ConnectionFailed(format!("{address}: {e}")))?
        .next()
        .ok_or_else(|| FileError::ConnectionFailed(format!("{address}: no address resolved")))
}

/// Fail fast with `ConnectionFailed` when `addr` does not accept a TCP
/// connection within `timeout`.
fn check_reachable(addr: SocketAddr, timeout: Duration) -> Result<(), FileError> {
    TcpStream::connect_timeout(&addr, timeout)
        .map(drop)
        .map_err(|e| FileError::ConnectionFailed(format!("{addr}: {e}")))
}

/// Connect, secure, log in and switch to passive binary transfers.
fn open_session(
    config: &ServerConfig,
    security: FtpSecurity,
    timeout: Duration,
    accept_invalid_certs: bool,
) -> Result<NativeTlsFtpStream, FileError> {
    let address = config.socket_address();
    let connect_err = |e: FtpError| match e {
        FtpError::ConnectionError(io) => FileError::ConnectionFailed(format!("{address}: {io}")),
        other => FileError::ConnectionFailed(format!("{address}: {other}")),
    };

    let mut stream = match security {
        FtpSecurity::Implicit => {
            let addr = resolve(config)?;
            // connect_secure_implicit connects without a timeout.
            check_reachable(addr, timeout)?;
            #[allow(deprecated)]
            let stream = NativeTlsFtpStream::connect_secure_implicit(
                addr,
                tls_connector(accept_invalid_certs)?,
                &config.address,
            )
            .map_err(connect_err)?;
            stream
        }
        FtpSecurity::None | FtpSecurity::Explicit => {
            let stream =
                NativeTlsFtpStream::connect_timeout(resolve(config)?, timeout).map_err(connect_err)?;
            if security == FtpSecurity::Explicit {
                stream
                    .into_secure(tls_connector(accept_invalid_certs)?, &config.address)
                    .map_err(connect_err)?
            } else {
                stream
            }
        }
    };

    let password = config.password.clone().unwrap_or_default();
    stream
        .login(config.username.as_str(), password.as_str())
        .map_err(|e| match e {
            FtpError::UnexpectedResponse(ref response)
                if matches!(response.status, Status::NotLoggedIn | Status::InvalidCredentials) =>
            {
                FileError::AuthenticationFailed(format!("{}@{address}", config.username))
            }
            other => map_ftp_error(other, &address),
        })?;
    stream.set_mode(Mode::Passive);
    stream
        .transfer_type(FileType::Binary)
        .map_err(|e| map_ftp_error(e, &address))?;

    info!("FTP session opened to {address} ({:?})", security);
    Ok(stream)
}

/// Map a reply status for an operation on `path`.
fn map_status(status: Status, path: &str, detail: &str) -> FileError {
    match status {
        Status::NotLoggedIn | Status::InvalidCredentials => {
            FileError::AuthenticationFailed(path.to_string())
        }
        Status::FileUnavailable | Status::RequestFileActionIgnored => {
            let lower = detail.to_lowercase();
            if lower.contains("exist") && !lower.contains("not exist") && !lower.contains("no such") {
                FileError::AlreadyExists(path.to_string())
            } else if lower.contains("permission") || lower.contains("denied") {
                FileError::PermissionDenied(path.to_string())
            } else {
                FileError::NotFound(path.to_string())
            }
        }
        Status::BadFilename => FileError::OperationFailed(format!("{path}: bad file name")),
        Status::NotAvailable | Status::HostUnavailable => {
            FileError::ConnectionFailed(format!("{path}: {detail}"))
        }
        _ => FileError::OperationFailed(format!("{path}: {detail}")),
    }
}

fn map_ftp_error(err: FtpError, path: &str) -> FileError {
    match err {
        FtpError::ConnectionError(io) => FileError::ConnectionFailed(format!("{path}: {io}")),
        FtpError::UnexpectedResponse(response) => {
            let detail = String::from_utf8_lossy(&response.body).trim().to_string();
            map_status(response.status, path, &detail)
        }
        other => FileError::OperationFailed(format!("{path}: {other}")),
    }
}

fn permissions_of(entry: &ListEntry) -> Permission {
    let mut perm = Permission::EMPTY;
    let groups = [
        (PosixPexQuery::Owner, Permission::OWNER_READ, Permission::OWNER_WRITE, Permission::OWNER_EXECUTE),
        (PosixPexQuery::Group, Permission::GROUP_READ, Permission::GROUP_WRITE, Permission::GROUP_EXECUTE),
        (PosixPexQuery::Others, Permission::OTHERS_READ, Permission::OTHERS_WRITE, Permission::OTHERS_EXECUTE),
    ];
    for (who, read, write, execute) in groups {
        perm.set(read, entry.can_read(who));
        perm.set(write, entry.can_write(who));
        perm.set(execute, entry.can_execute(who));
    }
    perm
}

/// Parse `LIST` output of `dir` into entries, skipping `.`, `..` and lines
/// in an unrecognized format.
fn parse_listing(lines: &[String], dir: &str, backend_id: &str) -> Vec<FileEntry> {
    lines
        .iter()
        .filter_map(|line| match ListEntry::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unparsable LIST line {line:?}: {e}");
                None
            }
        })
        .filter(|entry| entry.name() != "." && entry.name() != "..")
        .map(|entry| FileEntry {
            uri: join_path(dir, entry.name()),
            backend_id: backend_id.to_string(),
            size: if entry.is_directory() { 0 } else { entry.size() as u64 },
            last_modified: epoch_millis(entry.modified()),
            is_directory: entry.is_directory(),
            permissions: permissions_of(&entry),
        })
        .collect()
}

fn list_sync(
    stream: &mut NativeTlsFtpStream,
    dir: &str,
    backend_id: &str,
) -> Result<Vec<FileEntry>, FileError> {
    let lines = stream.list(Some(dir)).map_err(|e| map_ftp_error(e, dir))?;
    Ok(parse_listing(&lines, dir, backend_id))
}

/// FTP has no portable stat; look the name up in its parent's listing.
fn stat_sync(stream: &mut NativeTlsFtpStream, path: &str, backend_id: &str) -> Result<FileEntry, FileError> {
    let Some(parent) = parent_path(path) else {
        return Ok(FileEntry::directory(path, backend_id));
    };
    let name = crate::files::utils::file_name(path);
    list_sync(stream, &parent, backend_id)?
        .into_iter()
        .find(|e| e.name() == name)
        .ok_or_else(|| FileError::NotFound(path.to_string()))
}

fn exists_sync(stream: &mut NativeTlsFtpStream, path: &str, backend_id: &str) -> Result<bool, FileError> {
    match stat_sync(stream, path, backend_id) {
        Ok(_) => Ok(true),
        Err(FileError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create every missing ancestor of `path`. Failures on existing
/// directories are ignored; the final operation reports real problems.
fn mkdir_parents(stream: &mut NativeTlsFtpStream, path: &str) {
    let mut ancestors = Vec::new();
    let mut current = parent_path(path);
    while let Some(dir) = current {
        if dir == "/" {
            break;
        }
        current = parent_path(&dir);
        ancestors.push(dir);
    }
    for dir in ancestors.into_iter().rev() {
        let _ = stream.mkdir(&dir);
    }
}

fn delete_sync(stream: &mut NativeTlsFtpStream, entry: &FileEntry) -> Result<(), FileError> {
    if entry.is_directory {
        for child in list_sync(stream, &entry.uri, &entry.backend_id)? {
            delete_sync(stream, &child)?;
        }
        stream.rmdir(&entry.uri).map_err(|e| map_ftp_error(e, &entry.uri))
    } else {
        stream.rm(&entry.uri).map_err(|e| map_ftp_error(e, &entry.uri))
    }
}

fn copy_sync(stream: &mut NativeTlsFtpStream, source: &FileEntry, target: &str) -> Result<(), FileError> {
    if source.is_directory {
        stream.mkdir(target).map_err(|e| map_ftp_error(e, target))?;
        for child in list_sync(stream, &source.uri, &source.backend_id)? {
            copy_sync(stream, &child, &join_path(target, child.name()))?;
        }
        Ok(())
    } else {
        let mut data = stream
            .retr_as_buffer(&source.uri)
            .map_err(|e| map_ftp_error(e, &source.uri))?;
        stream
            .put_file(target, &mut data)
            .map(|_| ())
            .map_err(|e| map_ftp_error(e, target))
    }
}

#[async_trait::async_trait]
impl Filesystem for FtpFilesystem {
    fn backend_id(&self) -> &str {
        &self.config.uuid
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote(self.config.scheme)
    }

    async fn default_location(&self) -> Result<FileEntry, FileError> {
        let initial = self.config.initial_dir.clone();
        let backend_id = self.config.uuid.clone();
        self.with_session(move |s| {
            let dir = if initial.is_empty() {
                s.pwd().map_err(|e| map_ftp_error(e, "pwd"))?
            } else {
                initial
            };
            stat_sync(s, &dir, &backend_id)
        })
        .await
    }

    async fn ping(&self) -> Result<(), FileError> {
        self.with_session(|s| s.noop().map_err(|e| map_ftp_error(e, "noop")))
            .await
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, FileError> {
        let path = path.to_string();
        let backend_id = self.config.uuid.clone();
        self.with_session(move |s| stat_sync(s, &path, &backend_id)).await
    }

    async fn list_files(&self, parent: &FileEntry) -> Result<Vec<FileEntry>, FileError> {
        let dir = parent.uri.clone();
        let backend_id = self.config.uuid.clone();
        self.with_session(move |s| list_sync(s, &dir, &backend_id)).await
    }

    async fn create_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let entry = entry.clone();
        self.with_session(move |s| {
            if exists_sync(s, &entry.uri, &entry.backend_id)? {
                return Err(FileError::AlreadyExists(entry.uri.clone()));
            }
            mkdir_parents(s, &entry.uri);
            if entry.is_directory {
                s.mkdir(&entry.uri).map_err(|e| map_ftp_error(e, &entry.uri))
            } else {
                s.put_file(&entry.uri, &mut Cursor::new(Vec::new()))
                    .map(|_| ())
                    .map_err(|e| map_ftp_error(e, &entry.uri))
            }
        })
        .await
    }

    async fn delete_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let path = entry.uri.clone();
        let backend_id = self.config.uuid.clone();
        self.with_session(move |s| {
            let resolved = stat_sync(s, &path, &backend_id)?;
            delete_sync(s, &resolved)
        })
        .await
    }

    async fn rename_file(&self, entry: &FileEntry, new_name: &str) -> Result<FileEntry, FileError> {
        if !is_valid_name(new_name) {
            return Err(FileError::OperationFailed(format!("invalid name '{new_name}'")));
        }
        let from = entry.uri.clone();
        let to = sibling_path(&entry.uri, new_name);
        let backend_id = self.config.uuid.clone();
        self.with_session(move |s| {
            if exists_sync(s, &to, &backend_id)? {
                return Err(FileError::AlreadyExists(to));
            }
            s.rename(&from, &to).map_err(|e| map_ftp_error(e, &from))?;
            stat_sync(s, &to, &backend_id)
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
        let backend_id = self.config.uuid.clone();
        self.with_session(move |s| {
            let resolved = stat_sync(s, &source_path, &backend_id)?;
            if exists_sync(s, &target, &backend_id)? {
                return Err(FileError::AlreadyExists(target));
            }
            copy_sync(s, &resolved, &target)
        })
        .await
    }

    async fn move_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        let from = source.uri.clone();
        let target = join_path(&destination.uri, source.name());
        let backend_id = self.config.uuid.clone();
        self.with_session(move |s| {
            if exists_sync(s, &target, &backend_id)? {
                return Err(FileError::AlreadyExists(target));
            }
            s.rename(&from, &target).map_err(|e| map_ftp_error(e, &from))
        })
        .await
    }

    fn compress_files(&self, _sources: Vec<FileEntry>, _destination: FileEntry) -> ProgressStream {
        progress::failed(FileError::Unsupported(format!(
            "compress over {}",
            self.config.scheme
        )))
    }

    fn extract_files(&self, _source: FileEntry, _destination: FileEntry) -> ProgressStream {
        progress::failed(FileError::Unsupported(format!(
            "extract over {}",
            self.config.scheme
        )))
    }

    async fn load_file(&self, entry: &FileEntry, params: &FileParams) -> Result<String, FileError> {
        let path = entry.uri.clone();
        let bytes = self
            .with_session(move |s| {
                s.retr_as_buffer(&path)
                    .map(Cursor::into_inner)
                    .map_err(|e| map_ftp_error(e, &path))
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
        self.with_session(move |s| {
            s.put_file(&path, &mut Cursor::new(bytes))
                .map(|_| ())
                .map_err(|e| map_ftp_error(e, &path))
        })
        .await
    }
}
