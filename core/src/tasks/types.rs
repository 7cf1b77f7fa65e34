use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TaskError;

/// The kind of work a task performs. Used for labelling only; the manager
/// treats every type the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Create,
    Rename,
    Delete,
    Copy,
    Move,
    Compress,
    Extract,
    Authenticate,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskType::Create => "create",
            TaskType::Rename => "rename",
            TaskType::Delete => "delete",
            TaskType::Copy => "copy",
            TaskType::Move => "move",
            TaskType::Compress => "compress",
            TaskType::Extract => "extract",
            TaskType::Authenticate => "authenticate",
        };
        f.write_str(label)
    }
}

/// Intermediate progress reported by a running action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    /// Items finished so far.
    pub completed: u64,
    /// Total items, when known up front.
    pub total: Option<u64>,
    /// Uri of the item just finished.
    pub current: Option<String>,
}

impl TaskProgress {
    pub fn new(completed: u64, total: Option<u64>, current: Option<String>) -> Self {
        Self {
            completed,
            total,
            current,
        }
    }
}

/// Lifecycle of a task.
///
/// `Pending -> Running* -> Done | Error`. `Done` and `Error` are terminal:
/// once published the status never changes again.
#[derive(Debug, Clone)]
pub enum TaskStatus {
    Pending,
    Running { progress: Option<TaskProgress> },
    Done,
    /// The action failed, panicked or the task was cancelled (reported as
    /// [`TaskError::NotFound`]). Observers can `downcast_ref` the cause to
    /// [`FileError`](crate::errors::FileError) to decide how to react.
    Error(Arc<anyhow::Error>),
}

impl TaskStatus {
    pub(crate) fn failed(err: anyhow::Error) -> Self {
        TaskStatus::Error(Arc::new(err))
    }

    pub(crate) fn not_found(task_id: &str) -> Self {
        Self::failed(anyhow::Error::new(TaskError::NotFound(task_id.to_string())))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error(_))
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            TaskStatus::Error(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Whether this is the status of a cancelled or unknown task.
    pub fn is_task_not_found(&self) -> bool {
        self.error()
            .and_then(|e| e.downcast_ref::<TaskError>())
            .is_some_and(|e| matches!(e, TaskError::NotFound(_)))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running { progress: None } => write!(f, "running"),
            TaskStatus::Running {
                progress: Some(progress),
            } => match progress.total {
                Some(total) => write!(f, "running ({}/{total})", progress.completed),
                None => write!(f, "running ({})", progress.completed),
            },
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Error(err) => write!(f, "error: {err}"),
        }
    }
}

/// Snapshot of a live task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}
