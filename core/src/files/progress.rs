//! Lazy per-item progress streams for long multi-file operations.
//!
//! A [`ProgressStream`] yields one [`FileEntry`] per completed item. The
//! producing job runs on the blocking pool and does not start until the
//! stream is first polled. The channel between job and stream holds a
//! single item, so the job never runs ahead of its consumer, and dropping
//! the stream makes the next [`ProgressSink::emit`] return `false`.

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::FileEntry;
use crate::errors::FileError;

/// Finite, ordered stream of progress items.
pub type ProgressStream = BoxStream<'static, Result<FileEntry, FileError>>;

/// Producer side handed to a blocking job.
pub struct ProgressSink {
    tx: mpsc::Sender<Result<FileEntry, FileError>>,
}

impl ProgressSink {
    /// Publish one completed item. Returns `false` once the consumer is gone;
    /// the job should stop at that point.
    pub fn emit(&self, entry: FileEntry) -> bool {
        self.tx.blocking_send(Ok(entry)).is_ok()
    }
}

enum Lazy<F> {
    Idle(F),
    Running(mpsc::Receiver<Result<FileEntry, FileError>>, JoinHandle<()>),
    Finished,
}

/// Build a stream driven by a blocking `job`. An `Err` returned by the job
/// becomes the final stream item, and so does a panic inside the job.
pub fn blocking_stream<F>(job: F) -> ProgressStream
where
    F: FnOnce(&ProgressSink) -> Result<(), FileError> + Send + 'static,
{
    stream::unfold(Lazy::Idle(job), |state| async move {
        let (rx, handle) = match state {
            Lazy::Idle(job) => {
                let (tx, rx) = mpsc::channel(1);
                let handle = tokio::task::spawn_blocking(move || {
                    let sink = ProgressSink { tx };
                    if let Err(e) = job(&sink) {
                        let _ = sink.tx.blocking_send(Err(e));
                    }
                });
                (rx, handle)
            }
            Lazy::Running(rx, handle) => (rx, handle),
            Lazy::Finished => return None,
        };
        next_item(rx, handle).await
    })
    .boxed()
}

async fn next_item<F>(
    mut rx: mpsc::Receiver<Result<FileEntry, FileError>>,
    handle: JoinHandle<()>,
) -> Option<(Result<FileEntry, FileError>, Lazy<F>)> {
    if let Some(item) = rx.recv().await {
        return Some((item, Lazy::Running(rx, handle)));
    }
    match handle.await {
        Err(e) if e.is_panic() => {
            warn!("Progress job panicked");
            Some((
                Err(FileError::OperationFailed("operation aborted by a panic".to_string())),
                Lazy::Finished,
            ))
        }
        _ => None,
    }
}

/// A stream whose only item is `err`.
pub fn failed(err: FileError) -> ProgressStream {
    stream::once(async move { Err(err) }).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn yields_items_in_order() {
        let stream = blocking_stream(|sink| {
            for name in ["a", "b", "c"] {
                if !sink.emit(FileEntry::file(format!("/{name}"), "local")) {
                    break;
                }
            }
            Ok(())
        });
        let uris: Vec<String> = stream.map(|r| r.unwrap().uri).collect().await;
        assert_eq!(uris, vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn job_error_is_last_item() {
        let stream = blocking_stream(|sink| {
            sink.emit(FileEntry::file("/ok", "local"));
            Err(FileError::PermissionDenied("/locked".into()))
        });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(
            items[1].as_ref().unwrap_err(),
            &FileError::PermissionDenied("/locked".into())
        );
    }

    #[tokio::test]
    async fn nothing_runs_until_polled() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let mut stream = blocking_stream(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!started.load(Ordering::SeqCst));

        assert!(stream.next().await.is_none());
        assert!(started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_stream_stops_job() {
        let emitted = Arc::new(AtomicUsize::new(0));
        let counter = emitted.clone();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let mut stream = blocking_stream(move |sink| {
            for i in 0..1000 {
                if !sink.emit(FileEntry::file(format!("/{i}"), "local")) {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
            let _ = done_tx.send(());
            Ok(())
        });
        stream.next().await.unwrap().unwrap();
        drop(stream);
        done_rx.await.unwrap();
        assert!(emitted.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn panicking_job_ends_with_error() {
        let stream = blocking_stream(|sink| {
            sink.emit(FileEntry::file("/first", "local"));
            panic!("archive walker blew up");
        });
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().uri, "/first");
        assert!(matches!(items[1], Err(FileError::OperationFailed(_))));
    }

    #[tokio::test]
    async fn failed_yields_single_error() {
        let items: Vec<_> = failed(FileError::Unsupported("x".into())).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
