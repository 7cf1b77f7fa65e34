//! Concrete [`Filesystem`](crate::files::Filesystem) implementations.
//!
//! The remote backends pull in protocol client libraries (`suppaftp`,
//! `ssh2`) and are gated behind the `ftp` and `sftp` cargo features, both
//! enabled by default.

#[cfg(feature = "ftp")]
pub mod ftp;
pub mod local;
pub mod root;
#[cfg(feature = "sftp")]
pub mod sftp;

pub use local::{LocalFilesystem, LOCAL_BACKEND_ID};
pub use root::{PrivilegedShell, RootFilesystem, ROOT_BACKEND_ID};
