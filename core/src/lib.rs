//! Core library for fsdock: a uniform async filesystem over local, privileged
//! and remote (FTP, FTPS, FTPES, SFTP) storage, plus the background task
//! coordination front ends use to run file operations.

pub mod backends;
pub mod config;
pub mod credential;
pub mod errors;
pub mod factory;
pub mod files;
pub mod server;
pub mod tasks;

pub use errors::{CoreError, FactoryError, FileError, TaskError};
pub use factory::FilesystemFactory;
pub use files::{FileEntry, Filesystem};
pub use tasks::{TaskManager, TaskStatus};
