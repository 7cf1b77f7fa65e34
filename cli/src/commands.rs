//! Execution of parsed commands against the core.
//!
//! Read-only commands call the filesystem directly. Mutating commands are
//! submitted to the [`TaskManager`] and awaited; Ctrl-C cancels the task.

use std::io::Write;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use fsdock_core::config::CoreConfig;
use fsdock_core::credential::CredentialStore;
use fsdock_core::errors::{FactoryError, FileError};
use fsdock_core::files::{sort, FileEntry, Filesystem};
use fsdock_core::server::{JsonServerStore, ServerRecord};
use fsdock_core::tasks::{TaskContext, TaskManager, TaskProgress, TaskStatus, TaskType};
use fsdock_core::FilesystemFactory;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::args::Command;

/// Environment variable holding the password or key passphrase for a
/// remote backend.
pub const SECRET_ENV: &str = "FSDOCK_SECRET";

pub struct App {
    factory: Arc<FilesystemFactory>,
    tasks: TaskManager,
    secret: Option<String>,
}

impl App {
    /// Wire the core with a JSON server store under `config.config_dir`.
    pub fn new(config: CoreConfig, secret: Option<String>) -> Self {
        let store = Arc::new(JsonServerStore::new(config.servers_file()));
        let factory = FilesystemFactory::new(store, Arc::new(CredentialStore::new()), config);
        Self {
            factory: Arc::new(factory),
            tasks: TaskManager::new(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    /// Resolve a backend id, using the supplied secret when the server has
    /// none cached.
    fn filesystem(&self, backend: &str) -> Result<Arc<dyn Filesystem>> {
        match self.factory.create(backend) {
            Err(FactoryError::AuthenticationRequired(uuid)) => {
                let secret = self.secret.as_deref().ok_or_else(|| {
                    anyhow!("Server {uuid} needs a password or key passphrase; set {SECRET_ENV}")
                })?;
                self.factory.authenticate(&uuid, secret);
                Ok(self.factory.create(backend)?)
            }
            other => Ok(other?),
        }
    }

    pub async fn run<R, W>(&self, command: Command, input: &mut R, out: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: Write,
    {
        match command {
            Command::List {
                backend,
                path,
                listing,
                json,
            } => {
                let fs = self.filesystem(&backend)?;
                let parent = match path {
                    Some(path) => fs.stat(&path).await?,
                    None => fs.default_location().await?,
                };
                let mut entries = fs.list_files(&parent).await?;
                sort::apply(&mut entries, &listing.options());
                if json {
                    writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
                } else {
                    for entry in &entries {
                        writeln!(out, "{}", format_entry(entry))?;
                    }
                }
                Ok(())
            }
            Command::Cat {
                backend,
                path,
                text,
            } => {
                let fs = self.filesystem(&backend)?;
                let entry = fs.stat(&path).await?;
                let text = fs.load_file(&entry, &text.params()).await?;
                out.write_all(text.as_bytes())?;
                Ok(())
            }
            Command::Write {
                backend,
                path,
                text: text_args,
            } => {
                let fs = self.filesystem(&backend)?;
                let mut text = String::new();
                input
                    .read_to_string(&mut text)
                    .await
                    .context("Failed to read standard input")?;
                let entry = FileEntry::file(path, fs.backend_id());
                fs.save_file(&entry, &text, &text_args.params()).await?;
                Ok(())
            }
            Command::Mkdir { backend, path } => {
                let fs = self.filesystem(&backend)?;
                let entry = FileEntry::directory(path, fs.backend_id());
                self.run_task(TaskType::Create, move |_ctx| async move {
                    fs.create_file(&entry).await?;
                    Ok(())
                })
                .await
            }
            Command::Touch { backend, path } => {
                let fs = self.filesystem(&backend)?;
                let entry = FileEntry::file(path, fs.backend_id());
                self.run_task(TaskType::Create, move |_ctx| async move {
                    fs.create_file(&entry).await?;
                    Ok(())
                })
                .await
            }
            Command::Remove { backend, path } => {
                let fs = self.filesystem(&backend)?;
                let entry = fs.stat(&path).await?;
                self.run_task(TaskType::Delete, move |_ctx| async move {
                    fs.delete_file(&entry).await?;
                    Ok(())
                })
                .await
            }
            Command::Rename {
                backend,
                path,
                new_name,
            } => {
                let fs = self.filesystem(&backend)?;
                let entry = fs.stat(&path).await?;
                self.run_task(TaskType::Rename, move |_ctx| async move {
                    let renamed = fs.rename_file(&entry, &new_name).await?;
                    info!("Renamed {} to {}", entry.uri, renamed.uri);
                    Ok(())
                })
                .await
            }
            Command::Copy {
                backend,
                source,
                destination,
            } => {
                let fs = self.filesystem(&backend)?;
                let (source, destination) = self.transfer_entries(&fs, &source, &destination).await?;
                self.run_task(TaskType::Copy, move |_ctx| async move {
                    fs.copy_file(&source, &destination).await?;
                    Ok(())
                })
                .await
            }
            Command::Move {
                backend,
                source,
                destination,
            } => {
                let fs = self.filesystem(&backend)?;
                let (source, destination) = self.transfer_entries(&fs, &source, &destination).await?;
                self.run_task(TaskType::Move, move |_ctx| async move {
                    fs.move_file(&source, &destination).await?;
                    Ok(())
                })
                .await
            }
            Command::Compress {
                backend,
                archive,
                sources,
            } => {
                let fs = self.filesystem(&backend)?;
                let mut entries = Vec::with_capacity(sources.len());
                for source in &sources {
                    entries.push(fs.stat(source).await?);
                }
                let archive = FileEntry::file(archive, fs.backend_id());
                let total = Some(entries.len() as u64);
                self.run_task(TaskType::Compress, move |ctx| async move {
                    drain(fs.compress_files(entries, archive), &ctx, total).await
                })
                .await
            }
            Command::Extract {
                backend,
                archive,
                destination,
            } => {
                let fs = self.filesystem(&backend)?;
                let archive = fs.stat(&archive).await?;
                let destination = FileEntry::directory(destination, fs.backend_id());
                self.run_task(TaskType::Extract, move |ctx| async move {
                    drain(fs.extract_files(archive, destination), &ctx, None).await
                })
                .await
            }
            Command::Ping { backend } => {
                let is_server = self
                    .factory
                    .servers()?
                    .iter()
                    .any(|server| server.uuid == backend);
                match (&self.secret, is_server) {
                    (Some(secret), true) => {
                        let factory = self.factory.clone();
                        let secret = secret.clone();
                        self.run_task(TaskType::Authenticate, move |_ctx| async move {
                            factory.verify_credentials(&backend, &secret).await
                        })
                        .await?;
                    }
                    _ => {
                        let fs = self.filesystem(&backend)?;
                        self.run_task(TaskType::Authenticate, move |_ctx| async move {
                            fs.ping().await?;
                            Ok(())
                        })
                        .await?;
                    }
                }
                writeln!(out, "ok")?;
                Ok(())
            }
            Command::Servers { json } => {
                let servers = self.factory.servers()?;
                if json {
                    let records: Vec<ServerRecord> = servers.iter().map(ServerRecord::from).collect();
                    writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
                } else {
                    for server in &servers {
                        writeln!(
                            out,
                            "{}  {:<5}  {}  {}@{}",
                            server.uuid,
                            server.scheme,
                            server.name,
                            server.username,
                            server.socket_address()
                        )?;
                    }
                }
                Ok(())
            }
            Command::AddServer(args) => {
                let server = args.into_config();
                let server = match &self.secret {
                    Some(secret) => server.with_secret(secret),
                    None => server,
                };
                self.factory.save_server(&server)?;
                writeln!(out, "{}", server.uuid)?;
                Ok(())
            }
            Command::RemoveServer { uuid } => {
                self.factory.delete_server(&uuid)?;
                Ok(())
            }
        }
    }

    async fn transfer_entries(
        &self,
        fs: &Arc<dyn Filesystem>,
        source: &str,
        destination: &str,
    ) -> Result<(FileEntry, FileEntry)> {
        let source = fs.stat(source).await?;
        let destination = fs.stat(destination).await?;
        if !destination.is_directory {
            bail!("Destination {} is not a directory", destination.uri);
        }
        Ok((source, destination))
    }

    /// Submit `action` and wait for its terminal status.
    async fn run_task<F, Fut>(&self, task_type: TaskType, action: F) -> Result<()>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let (task_id, rx) = self.tasks.submit(task_type, action);
        debug!("Waiting for {task_type} task {task_id}");
        tokio::select! {
            result = wait_for(rx) => result,
            _ = tokio::signal::ctrl_c() => {
                self.tasks.cancel(&task_id);
                bail!("Cancelled {task_type} task {task_id}")
            }
        }
    }
}

/// Consume a progress stream, reporting each item to the task.
async fn drain(
    mut stream: fsdock_core::files::ProgressStream,
    ctx: &TaskContext,
    total: Option<u64>,
) -> Result<()> {
    let mut completed = 0;
    while let Some(item) = stream.next().await {
        ctx.check_cancelled()?;
        let entry = item?;
        completed += 1;
        ctx.report(TaskProgress::new(completed, total, Some(entry.uri)));
    }
    Ok(())
}

async fn wait_for(mut rx: watch::Receiver<TaskStatus>) -> Result<()> {
    loop {
        let status = rx.borrow_and_update().clone();
        match &status {
            TaskStatus::Done => return Ok(()),
            TaskStatus::Error(err) => return Err(task_failure(err)),
            TaskStatus::Running {
                progress: Some(progress),
            } => {
                if let Some(current) = &progress.current {
                    info!("{status}: {current}");
                }
            }
            _ => {}
        }
        if rx.changed().await.is_err() {
            return match &*rx.borrow() {
                TaskStatus::Done => Ok(()),
                TaskStatus::Error(err) => Err(task_failure(err)),
                other => Err(anyhow!("Task ended while {other}")),
            };
        }
    }
}

/// Rebuild an owned error from a shared task failure, keeping a
/// [`FileError`] cause so `main` can classify it.
fn task_failure(err: &anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<FileError>() {
        Some(file_err) => anyhow::Error::new(file_err.clone()),
        None => anyhow!("{err:#}"),
    }
}

/// One `ls` line: permissions, size, modification time, name.
fn format_entry(entry: &FileEntry) -> String {
    let kind = if entry.is_directory { 'd' } else { '-' };
    let modified = entry
        .modified_at()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".repeat(16));
    let suffix = if entry.is_directory { "/" } else { "" };
    format!(
        "{kind}{} {:>10} {modified} {}{suffix}",
        entry.permissions.to_rwx_string(),
        entry.size,
        entry.name()
    )
}
