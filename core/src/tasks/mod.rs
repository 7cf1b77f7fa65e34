//! Asynchronous task coordination for long-running file operations.

pub mod manager;
pub mod types;

pub use manager::{TaskContext, TaskManager};
pub use types::{Task, TaskProgress, TaskStatus, TaskType};
