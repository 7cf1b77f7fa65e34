//! Unified error types for the fsdock core crate.
//!
//! Backends report [`FileError`], the factory reports [`FactoryError`] and
//! the task manager reports [`TaskError`]. Front ends map the error kind to
//! their own presentation (credential prompt, retry toast, terminal message);
//! the core performs no user-facing formatting beyond `Display`.

use thiserror::Error;

/// Top-level error type encompassing all core error categories.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A filesystem-operation error.
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// A backend resolution error.
    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    /// A task bookkeeping error.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// A configuration error (invalid values, missing fields, parse failures).
    #[error("Config error: {0}")]
    Config(String),

    /// A low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`Filesystem`](crate::files::Filesystem) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    /// The requested file or directory was not found.
    #[error("File not found: {0}")]
    NotFound(String),

    /// The target of a create/rename/copy already exists.
    #[error("File already exists: {0}")]
    AlreadyExists(String),

    /// Permission was denied for the requested operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The backend does not implement this operation.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// The remote host could not be reached or the session broke.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote host rejected the supplied credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Any other failure (disk full, malformed reply, invalid encoding).
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl FileError {
    /// Classify an I/O error that occurred while operating on `path`.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => FileError::NotFound(path.to_string()),
            ErrorKind::PermissionDenied => FileError::PermissionDenied(path.to_string()),
            ErrorKind::AlreadyExists => FileError::AlreadyExists(path.to_string()),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut => FileError::ConnectionFailed(format!("{path}: {err}")),
            _ => FileError::OperationFailed(format!("{path}: {err}")),
        }
    }

    /// Whether a caller may transparently retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FileError::ConnectionFailed(_))
    }

    /// Whether the caller must re-prompt for credentials.
    pub fn needs_credentials(&self) -> bool {
        matches!(self, FileError::AuthenticationFailed(_))
    }
}

/// Errors raised while resolving a backend id to a filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
    /// The id is neither a reserved backend nor a known server uuid.
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// The stored server uses a scheme this build cannot handle.
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The server has no secret available; prompt the user and call
    /// [`authenticate`](crate::factory::FilesystemFactory::authenticate).
    #[error("Authentication required for server {0}")]
    AuthenticationRequired(String),

    /// The server definition is malformed.
    #[error("Invalid server config: {0}")]
    InvalidConfig(String),

    /// The durable server store failed.
    #[error("Server storage failed: {0}")]
    Storage(String),
}

/// Errors related to task bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task id is not (or no longer) registered.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// The task observed its cancellation signal and stopped early.
    #[error("Task cancelled: {0}")]
    Cancelled(String),

    /// The task body panicked.
    #[error("Task panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_error_display() {
        let err = FileError::NotFound("/tmp/missing".into());
        assert_eq!(err.to_string(), "File not found: /tmp/missing");

        let err = FileError::PermissionDenied("/root".into());
        assert_eq!(err.to_string(), "Permission denied: /root");

        let err = FileError::Unsupported("compress over ftp".into());
        assert_eq!(err.to_string(), "Operation not supported: compress over ftp");
    }

    #[test]
    fn factory_error_display() {
        let err = FactoryError::AuthenticationRequired("srv-1".into());
        assert_eq!(err.to_string(), "Authentication required for server srv-1");

        let err = FactoryError::UnsupportedScheme("gopher".into());
        assert_eq!(err.to_string(), "Unsupported scheme: gopher");
    }

    #[test]
    fn task_error_display() {
        let err = TaskError::NotFound("t-1".into());
        assert_eq!(err.to_string(), "Task not found: t-1");
    }

    #[test]
    fn from_io_classifies_kinds() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(
            FileError::from_io(io, "/a"),
            FileError::NotFound("/a".into())
        );

        let io = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "dup");
        assert_eq!(
            FileError::from_io(io, "/b"),
            FileError::AlreadyExists("/b".into())
        );

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(FileError::from_io(io, "host:21").is_retryable());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(matches!(
            FileError::from_io(io, "/c"),
            FileError::OperationFailed(_)
        ));
    }

    #[test]
    fn retry_and_prompt_policies_are_distinct() {
        let conn = FileError::ConnectionFailed("x".into());
        let auth = FileError::AuthenticationFailed("x".into());
        assert!(conn.is_retryable());
        assert!(!conn.needs_credentials());
        assert!(auth.needs_credentials());
        assert!(!auth.is_retryable());
    }

    #[test]
    fn core_error_from_file_error() {
        let core_err: CoreError = FileError::NotFound("/missing".into()).into();
        assert_eq!(core_err.to_string(), "File error: File not found: /missing");
    }

    #[test]
    fn core_error_from_factory_error() {
        let core_err: CoreError = FactoryError::UnknownBackend("nope".into()).into();
        assert_eq!(core_err.to_string(), "Factory error: Unknown backend: nope");
    }

    #[test]
    fn core_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let core_err: CoreError = io_err.into();
        assert_eq!(core_err.to_string(), "I/O error: gone");
    }
}
