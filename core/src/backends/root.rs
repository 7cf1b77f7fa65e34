//! Host filesystem with elevated privileges.
//!
//! Every operation is a short POSIX shell script run through a privilege
//! elevation program (`su -c` by default). Listing and stat parse the
//! output of `stat -c`; file contents travel over stdin/stdout.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::FileError;
use crate::files::progress;
use crate::files::utils::{is_valid_name, join_path, parent_path, shell_quote, sibling_path};
use crate::files::{text, BackendKind, FileEntry, FileParams, Filesystem, Permission, ProgressStream};

/// Reserved backend id of the privileged host filesystem.
pub const ROOT_BACKEND_ID: &str = "root";

/// `stat` format: type, size, mtime (seconds), `ls -l` mode string, name.
const STAT_FORMAT: &str = "%F|%s|%Y|%A|%n";

/// The elevation program and the arguments placed before the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedShell {
    pub program: String,
    pub args: Vec<String>,
}

impl PrivilegedShell {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Default for PrivilegedShell {
    fn default() -> Self {
        Self::new("su", vec!["-c".to_string()])
    }
}

pub struct RootFilesystem {
    shell: PrivilegedShell,
}

impl RootFilesystem {
    pub fn new(shell: PrivilegedShell) -> Self {
        Self { shell }
    }

    /// Run `script` and return stdout. A non-zero exit is classified from
    /// stderr.
    async fn exec(&self, script: &str, stdin_data: Option<&[u8]>) -> Result<Vec<u8>, FileError> {
        debug!("Root exec: {script}");
        let mut child = Command::new(&self.shell.program)
            .args(&self.shell.args)
            .arg(script)
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FileError::PermissionDenied(format!(
                    "cannot start '{}': {e}",
                    self.shell.program
                ))
            })?;

        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(data)
                    .await
                    .map_err(|e| FileError::OperationFailed(format!("Failed to write stdin: {e}")))?;
                stdin
                    .shutdown()
                    .await
                    .map_err(|e| FileError::OperationFailed(format!("Failed to close stdin: {e}")))?;
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FileError::OperationFailed(format!("Failed to wait for shell: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(map_shell_error(&stderr));
        }
        Ok(output.stdout)
    }

    async fn exec_text(&self, script: &str) -> Result<String, FileError> {
        let stdout = self.exec(script, None).await?;
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}

/// Script that fails with "File exists" when `path` is taken.
fn refuse_existing(path: &str) -> String {
    let quoted = shell_quote(path);
    format!("if [ -e {quoted} ] || [ -L {quoted} ]; then printf '%s: File exists\\n' {quoted} >&2; exit 1; fi")
}

/// Parse one `stat -c STAT_FORMAT` line.
fn parse_stat_line(line: &str) -> Option<FileEntry> {
    let fields: Vec<&str> = line.splitn(5, '|').collect();
    if fields.len() < 5 {
        return None;
    }
    let is_directory = fields[0].contains("directory");
    let size: u64 = fields[1].parse().unwrap_or(0);
    let mtime: i64 = fields[2].parse().unwrap_or(0);

    Some(FileEntry {
        uri: fields[4].to_string(),
        backend_id: ROOT_BACKEND_ID.to_string(),
        size: if is_directory { 0 } else { size },
        last_modified: mtime * 1000,
        is_directory,
        permissions: Permission::from_rwx_string(fields[3].trim()),
    })
}

/// Map shell stderr to the matching `FileError`.
fn map_shell_error(stderr: &str) -> FileError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();
    if lower.contains("no such file") || lower.contains("not found") {
        FileError::NotFound(message)
    } else if lower.contains("file exists") {
        FileError::AlreadyExists(message)
    } else if lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("authentication failure")
        || lower.contains("incorrect password")
        || lower.contains("must be run from a terminal")
    {
        FileError::PermissionDenied(message)
    } else {
        FileError::OperationFailed(message)
    }
}

#[async_trait::async_trait]
impl Filesystem for RootFilesystem {
    fn backend_id(&self) -> &str {
        ROOT_BACKEND_ID
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Root
    }

    async fn default_location(&self) -> Result<FileEntry, FileError> {
        self.stat("/").await
    }

    async fn ping(&self) -> Result<(), FileError> {
        self.exec("true", None).await.map(|_| ())
    }

    async fn stat(&self, path: &str) -> Result<FileEntry, FileError> {
        let output = self
            .exec_text(&format!(
                "stat -L -c {} -- {}",
                shell_quote(STAT_FORMAT),
                shell_quote(path)
            ))
            .await?;
        let mut entry = output
            .lines()
            .next()
            .and_then(parse_stat_line)
            .ok_or_else(|| FileError::OperationFailed(format!("Unexpected stat output: {output}")))?;
        entry.uri = path.to_string();
        Ok(entry)
    }

    async fn list_files(&self, parent: &FileEntry) -> Result<Vec<FileEntry>, FileError> {
        let dir = shell_quote(&parent.uri);
        let base = shell_quote(parent.uri.trim_end_matches('/'));
        let stat_format = shell_quote(STAT_FORMAT);
        // Each child is stat'ed on its own; a dangling link falls back to
        // the link itself and an entry that vanished meanwhile is skipped.
        let script = format!(
            "[ -d {dir} ] || {{ printf '%s: No such file or directory\\n' {dir} >&2; exit 1; }}; \
             for f in {base}/* {base}/.[!.]* {base}/..?*; do \
             [ -e \"$f\" ] || [ -L \"$f\" ] || continue; \
             stat -L -c {stat_format} -- \"$f\" 2>/dev/null || stat -c {stat_format} -- \"$f\" 2>/dev/null || true; \
             done"
        );
        let output = self.exec_text(&script).await?;
        Ok(output.lines().filter_map(parse_stat_line).collect())
    }

    async fn create_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let path = shell_quote(&entry.uri);
        let make = if entry.is_directory {
            format!("mkdir -p -- {path}")
        } else {
            let parent = parent_path(&entry.uri).unwrap_or_else(|| "/".to_string());
            format!("mkdir -p -- {} && touch -- {path}", shell_quote(&parent))
        };
        self.exec(&format!("{}; {make}", refuse_existing(&entry.uri)), None)
            .await
            .map(|_| ())
    }

    async fn delete_file(&self, entry: &FileEntry) -> Result<(), FileError> {
        let path = shell_quote(&entry.uri);
        let script = format!(
            "[ -e {path} ] || [ -L {path} ] || {{ printf '%s: No such file or directory\\n' {path} >&2; exit 1; }}; rm -rf -- {path}"
        );
        self.exec(&script, None).await.map(|_| ())
    }

    async fn rename_file(&self, entry: &FileEntry, new_name: &str) -> Result<FileEntry, FileError> {
        if !is_valid_name(new_name) {
            return Err(FileError::OperationFailed(format!("invalid name '{new_name}'")));
        }
        let target = sibling_path(&entry.uri, new_name);
        let script = format!(
            "{}; mv -- {} {}",
            refuse_existing(&target),
            shell_quote(&entry.uri),
            shell_quote(&target)
        );
        self.exec(&script, None).await?;
        self.stat(&target).await
    }

    async fn copy_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        let target = join_path(&destination.uri, source.name());
        let script = format!(
            "{}; cp -r -- {} {}",
            refuse_existing(&target),
            shell_quote(&source.uri),
            shell_quote(&target)
        );
        self.exec(&script, None).await.map(|_| ())
    }

    async fn move_file(&self, source: &FileEntry, destination: &FileEntry) -> Result<(), FileError> {
        let target = join_path(&destination.uri, source.name());
        let script = format!(
            "{}; mv -- {} {}",
            refuse_existing(&target),
            shell_quote(&source.uri),
            shell_quote(&target)
        );
        self.exec(&script, None).await.map(|_| ())
    }

    fn compress_files(&self, _sources: Vec<FileEntry>, _destination: FileEntry) -> ProgressStream {
        progress::failed(FileError::Unsupported(
            "compress on the root filesystem".to_string(),
        ))
    }

    fn extract_files(&self, _source: FileEntry, _destination: FileEntry) -> ProgressStream {
        progress::failed(FileError::Unsupported(
            "extract on the root filesystem".to_string(),
        ))
    }

    async fn load_file(&self, entry: &FileEntry, params: &FileParams) -> Result<String, FileError> {
        let bytes = self
            .exec(&format!("cat -- {}", shell_quote(&entry.uri)), None)
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
        let parent = parent_path(&entry.uri).unwrap_or_else(|| "/".to_string());
        let script = format!(
            "mkdir -p -- {} && cat > {}",
            shell_quote(&parent),
            shell_quote(&entry.uri)
        );
        self.exec(&script, Some(&bytes)).await.map(|_| ())
    }
}
