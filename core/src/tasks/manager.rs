//! Background execution of long file operations.
//!
//! Each submitted action runs as its own tokio task under a small
//! supervisor that publishes status transitions on a `watch` channel and
//! removes the task from the live registry once it reaches a terminal
//! status. Cancellation is cooperative through a [`CancellationToken`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::TaskError;

use super::types::{Task, TaskProgress, TaskStatus, TaskType};

/// A live task in the registry.
struct TaskEntry {
    task_type: TaskType,
    created_at: chrono::DateTime<Utc>,
    status: watch::Sender<TaskStatus>,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<String, TaskEntry>>>;

/// Handle given to a running action.
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    registry: Registry,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Publish intermediate progress. Ignored once the task is cancelled.
    pub fn report(&self, progress: TaskProgress) {
        let tasks = self.registry.lock().expect("task registry lock poisoned");
        if let Some(entry) = tasks.get(&self.task_id) {
            entry.status.send_replace(TaskStatus::Running {
                progress: Some(progress),
            });
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the task is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(TaskError::Cancelled)` once the task is cancelled, for early
    /// exit with `?`.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            Err(TaskError::Cancelled(self.task_id.clone()))
        } else {
            Ok(())
        }
    }
}

/// Runs file operations concurrently and tracks their status.
///
/// Cheap to clone; clones share the same registry. `execute` and `submit`
/// must be called from within a Tokio runtime.
#[derive(Clone, Default)]
pub struct TaskManager {
    tasks: Registry,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit `action` and return its task id immediately.
    pub fn execute<F, Fut>(&self, task_type: TaskType, action: F) -> String
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.submit(task_type, action).0
    }

    /// Like [`execute`](Self::execute), but also returns a status receiver
    /// subscribed before the action starts, so no transition can be missed.
    pub fn submit<F, Fut>(&self, task_type: TaskType, action: F) -> (String, watch::Receiver<TaskStatus>)
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task_id = uuid::Uuid::new_v4().to_string();
        let (status, receiver) = watch::channel(TaskStatus::Pending);
        let cancel = CancellationToken::new();

        {
            let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    task_type,
                    created_at: Utc::now(),
                    status,
                    cancel: cancel.clone(),
                },
            );
        }
        debug!("Task {task_id} ({task_type}) registered");

        let context = TaskContext {
            task_id: task_id.clone(),
            registry: self.tasks.clone(),
            cancel,
        };
        tokio::spawn(supervise(self.tasks.clone(), task_id.clone(), task_type, action, context));

        (task_id, receiver)
    }

    /// Live view of a task's status. For an unknown or finished id the
    /// receiver holds `Error(TaskNotFound)` and never changes.
    pub fn monitor(&self, task_id: &str) -> watch::Receiver<TaskStatus> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        match tasks.get(task_id) {
            Some(entry) => entry.status.subscribe(),
            None => watch::channel(TaskStatus::not_found(task_id)).1,
        }
    }

    /// Signal cancellation and drop the task from the registry. Observers
    /// see `Error(TaskNotFound)`. Returns `false` if the id is not live.
    pub fn cancel(&self, task_id: &str) -> bool {
        let entry = {
            let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
            tasks.remove(task_id)
        };
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                entry.status.send_replace(TaskStatus::not_found(task_id));
                info!("Task {task_id} ({}) cancelled", entry.task_type);
                true
            }
            None => false,
        }
    }

    /// Cancel every live task (shutdown).
    pub fn cancel_all(&self) {
        let drained: Vec<(String, TaskEntry)> = {
            let mut tasks = self.tasks.lock().expect("task registry lock poisoned");
            tasks.drain().collect()
        };
        for (task_id, entry) in drained {
            entry.cancel.cancel();
            entry.status.send_replace(TaskStatus::not_found(&task_id));
            debug!("Shutdown: cancelled task {task_id}");
        }
    }

    /// Whether no task is pending or running.
    pub fn is_idle(&self) -> bool {
        self.tasks
            .lock()
            .expect("task registry lock poisoned")
            .is_empty()
    }

    /// Snapshot of live tasks, oldest first.
    pub fn active_tasks(&self) -> Vec<Task> {
        let tasks = self.tasks.lock().expect("task registry lock poisoned");
        let mut active: Vec<Task> = tasks
            .iter()
            .map(|(id, entry)| Task {
                id: id.clone(),
                task_type: entry.task_type,
                status: entry.status.borrow().clone(),
                created_at: entry.created_at,
            })
            .collect();
        active.sort_by_key(|t| t.created_at);
        active
    }
}

/// Publish `status` for a live task. Returns `false` if it was cancelled.
fn publish(registry: &Registry, task_id: &str, status: TaskStatus) -> bool {
    let tasks = registry.lock().expect("task registry lock poisoned");
    match tasks.get(task_id) {
        Some(entry) => {
            entry.status.send_replace(status);
            true
        }
        None => false,
    }
}

/// Publish the terminal status and unregister in one critical section.
/// Dropping the entry drops the sender, which freezes the status.
fn finish(registry: &Registry, task_id: &str, status: TaskStatus) {
    let mut tasks = registry.lock().expect("task registry lock poisoned");
    if let Some(entry) = tasks.remove(task_id) {
        entry.status.send_replace(status);
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}

async fn supervise<F, Fut>(
    registry: Registry,
    task_id: String,
    task_type: TaskType,
    action: F,
    context: TaskContext,
) where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    if !publish(&registry, &task_id, TaskStatus::Running { progress: None }) {
        debug!("Task {task_id} cancelled before it started");
        return;
    }

    // The action runs as its own task so a panic is caught here.
    let outcome = tokio::spawn(async move { action(context).await }).await;

    let status = match outcome {
        Ok(Ok(())) => {
            debug!("Task {task_id} ({task_type}) done");
            TaskStatus::Done
        }
        Ok(Err(err)) => {
            warn!("Task {task_id} ({task_type}) failed: {err:#}");
            TaskStatus::failed(err)
        }
        Err(join_err) => {
            let message = panic_message(join_err);
            warn!("Task {task_id} ({task_type}) panicked: {message}");
            TaskStatus::failed(TaskError::Panicked(message).into())
        }
    };
    finish(&registry, &task_id, status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FileError;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_terminal(mut rx: watch::Receiver<TaskStatus>) -> TaskStatus {
        loop {
            if rx.borrow().is_terminal() {
                return rx.borrow().clone();
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    #[tokio::test]
    async fn successful_task_ends_done_and_unregisters() {
        let manager = TaskManager::new();
        let (_, rx) = manager.submit(TaskType::Create, |_| async { Ok(()) });
        assert!(matches!(wait_terminal(rx).await, TaskStatus::Done));
        // Registry removal happens before the sender is dropped.
        assert!(manager.is_idle());
    }

    #[tokio::test]
    async fn failing_task_keeps_cause() {
        let manager = TaskManager::new();
        let (_, rx) = manager.submit(TaskType::Delete, |_| async {
            Err(anyhow::Error::new(FileError::PermissionDenied("/root/x".into())))
        });
        let status = wait_terminal(rx).await;
        let cause = status.error().unwrap().downcast_ref::<FileError>();
        assert_eq!(cause, Some(&FileError::PermissionDenied("/root/x".into())));
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let manager = TaskManager::new();
        let (_, rx) = manager.submit(TaskType::Copy, |_| async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let status = wait_terminal(rx).await;
        let cause = status.error().unwrap().downcast_ref::<TaskError>();
        assert_eq!(cause, Some(&TaskError::Panicked("boom".into())));
        assert!(manager.is_idle());
    }

    #[tokio::test]
    async fn running_and_progress_are_published() {
        let manager = TaskManager::new();
        let (go_tx, go_rx) = oneshot::channel::<()>();
        let (_, mut rx) = manager.submit(TaskType::Compress, |ctx| async move {
            ctx.report(TaskProgress::new(1, Some(2), Some("/a".into())));
            let _ = go_rx.await;
            Ok(())
        });

        let progress = loop {
            rx.changed().await.unwrap();
            if let TaskStatus::Running {
                progress: Some(progress),
            } = &*rx.borrow()
            {
                break progress.clone();
            }
        };
        assert_eq!(progress.completed, 1);
        assert_eq!(manager.active_tasks().len(), 1);
        assert_eq!(manager.active_tasks()[0].task_type, TaskType::Compress);

        go_tx.send(()).unwrap();
        assert!(matches!(wait_terminal(rx).await, TaskStatus::Done));
    }

    #[tokio::test]
    async fn cancel_is_immediate_even_if_ignored() {
        let manager = TaskManager::new();
        let id = manager.execute(TaskType::Copy, |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        let rx = manager.monitor(&id);

        assert!(manager.cancel(&id));
        assert!(manager.is_idle());
        assert!(wait_terminal(rx).await.is_task_not_found());
        assert!(manager.monitor(&id).borrow().is_task_not_found());
        assert!(!manager.cancel(&id));
    }

    #[tokio::test]
    async fn cooperative_action_sees_cancellation() {
        let manager = TaskManager::new();
        let (seen_tx, seen_rx) = oneshot::channel();
        let (started_tx, started_rx) = oneshot::channel();
        let id = manager.execute(TaskType::Extract, |ctx| async move {
            let _ = started_tx.send(());
            ctx.cancelled().await;
            let _ = seen_tx.send(ctx.check_cancelled().is_err());
            Ok(())
        });
        started_rx.await.unwrap();
        manager.cancel(&id);
        assert!(seen_rx.await.unwrap());
    }

    #[tokio::test]
    async fn unknown_id_monitor_is_not_found() {
        let manager = TaskManager::new();
        let rx = manager.monitor("does-not-exist");
        let status = rx.borrow().clone();
        assert!(status.is_terminal());
        assert_eq!(
            status.error().unwrap().to_string(),
            "Task not found: does-not-exist"
        );
    }

    #[tokio::test]
    async fn cancel_all_empties_registry() {
        let manager = TaskManager::new();
        for _ in 0..3 {
            manager.execute(TaskType::Move, |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            });
        }
        assert_eq!(manager.active_tasks().len(), 3);
        manager.cancel_all();
        assert!(manager.is_idle());
    }
}
