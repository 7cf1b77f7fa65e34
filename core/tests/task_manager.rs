//! File operations run through the task manager.

mod common;

use fsdock_core::errors::FileError;
use fsdock_core::files::FileEntry;
use fsdock_core::tasks::{TaskManager, TaskStatus, TaskType};

#[tokio::test]
async fn failing_delete_and_concurrent_copy() {
    let dir = tempfile::tempdir().unwrap();
    let fs = common::factory_with(&[]).create("local").unwrap();
    let root = FileEntry::directory(dir.path().to_string_lossy(), "local");
    let source = root.child("report.txt", false);
    let target = root.child("backup", true);
    fs.create_file(&source).await.unwrap();
    fs.create_file(&target).await.unwrap();

    let manager = TaskManager::new();

    let missing = root.child("missing.txt", false);
    let delete_fs = fs.clone();
    let (_, delete_rx) = manager.submit(TaskType::Delete, move |_ctx| async move {
        delete_fs.delete_file(&missing).await?;
        Ok(())
    });

    let copy_fs = fs.clone();
    let (copy_source, copy_target) = (source.clone(), target.clone());
    let (_, copy_rx) = manager.submit(TaskType::Copy, move |_ctx| async move {
        copy_fs.copy_file(&copy_source, &copy_target).await?;
        Ok(())
    });

    let delete_status = common::wait_terminal(delete_rx).await;
    let copy_status = common::wait_terminal(copy_rx).await;

    let cause = delete_status
        .error()
        .and_then(|e| e.downcast_ref::<FileError>())
        .cloned();
    assert!(matches!(cause, Some(FileError::NotFound(_))), "{delete_status}");
    assert!(matches!(copy_status, TaskStatus::Done), "{copy_status}");
    assert!(dir.path().join("backup/report.txt").is_file());
    assert!(manager.is_idle());
}

#[tokio::test]
async fn cancelled_task_reports_not_found() {
    let manager = TaskManager::new();
    let (id, rx) = manager.submit(TaskType::Compress, |ctx| async move {
        ctx.cancelled().await;
        Ok(())
    });

    assert_eq!(manager.active_tasks().len(), 1);
    assert!(manager.cancel(&id));
    assert!(common::wait_terminal(rx).await.is_task_not_found());
    assert!(!manager.cancel(&id));
    assert!(manager.monitor(&id).borrow().is_task_not_found());
}
