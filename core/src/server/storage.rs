use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::{ServerConfig, ServerRecord};

/// Durable storage for server definitions.
///
/// Implementations never see secrets: callers pass configs through
/// [`ServerConfig::without_secrets`] and stores must not persist
/// `password` or `passphrase` even if handed one.
pub trait ServerStore: Send + Sync {
    /// Load one server. `Ok(None)` if the uuid is unknown; an error wrapping
    /// [`FactoryError::UnsupportedScheme`](crate::errors::FactoryError) if the
    /// stored scheme is not recognized.
    fn load_server(&self, uuid: &str) -> Result<Option<ServerConfig>>;

    /// All servers with a recognized scheme.
    fn load_all(&self) -> Result<Vec<ServerConfig>>;

    /// Add or replace a server by uuid.
    fn upsert(&self, config: &ServerConfig) -> Result<()>;

    /// Remove a server. No-op if the uuid is unknown.
    fn delete(&self, uuid: &str) -> Result<()>;
}

/// Top-level schema of the servers JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFile {
    pub version: String,
    pub servers: Vec<ServerRecord>,
}

impl Default for ServerFile {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            servers: Vec::new(),
        }
    }
}

/// Handles reading/writing the servers JSON file.
///
/// The whole file is rewritten on every change; the number of configured
/// servers is small and operator-controlled.
pub struct JsonServerStore {
    file_path: PathBuf,
    lock: Mutex<()>,
}

impl JsonServerStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        info!("Using server store: {}", file_path.display());
        Self {
            file_path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Read the file. Returns an empty store if it doesn't exist.
    fn read(&self) -> Result<ServerFile> {
        if !self.file_path.exists() {
            return Ok(ServerFile::default());
        }
        let data = fs::read_to_string(&self.file_path).context("Failed to read servers file")?;
        serde_json::from_str(&data).context("Failed to parse servers file")
    }

    /// Write the file (pretty-printed JSON), creating its directory.
    fn write(&self, file: &ServerFile) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent).context("Failed to create server store directory")?;
        }
        let data = serde_json::to_string_pretty(file).context("Failed to serialize servers")?;
        fs::write(&self.file_path, data).context("Failed to write servers file")
    }
}

impl ServerStore for JsonServerStore {
    fn load_server(&self, uuid: &str) -> Result<Option<ServerConfig>> {
        let _guard = self.lock.lock().expect("server store lock poisoned");
        let file = self.read()?;
        match file.servers.into_iter().find(|r| r.uuid == uuid) {
            Some(record) => Ok(Some(ServerConfig::try_from(record)?)),
            None => Ok(None),
        }
    }

    fn load_all(&self) -> Result<Vec<ServerConfig>> {
        let _guard = self.lock.lock().expect("server store lock poisoned");
        let file = self.read()?;
        let mut servers = Vec::with_capacity(file.servers.len());
        for record in file.servers {
            let uuid = record.uuid.clone();
            match ServerConfig::try_from(record) {
                Ok(config) => servers.push(config),
                Err(e) => warn!("Skipping stored server {uuid}: {e}"),
            }
        }
        Ok(servers)
    }

    fn upsert(&self, config: &ServerConfig) -> Result<()> {
        let _guard = self.lock.lock().expect("server store lock poisoned");
        let mut file = self.read()?;
        let record = ServerRecord::from(config);
        if let Some(existing) = file.servers.iter_mut().find(|r| r.uuid == record.uuid) {
            *existing = record;
        } else {
            file.servers.push(record);
        }
        self.write(&file).context("Failed to persist server")
    }

    fn delete(&self, uuid: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("server store lock poisoned");
        let mut file = self.read()?;
        let before = file.servers.len();
        file.servers.retain(|r| r.uuid != uuid);
        if file.servers.len() == before {
            return Ok(());
        }
        self.write(&file).context("Failed to persist after delete")
    }
}

/// Process-local store, for embedding and tests.
#[derive(Default)]
pub struct MemoryServerStore {
    servers: Mutex<HashMap<String, ServerConfig>>,
}

impl MemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServerStore for MemoryServerStore {
    fn load_server(&self, uuid: &str) -> Result<Option<ServerConfig>> {
        let servers = self.servers.lock().expect("server store lock poisoned");
        Ok(servers.get(uuid).cloned())
    }

    fn load_all(&self) -> Result<Vec<ServerConfig>> {
        let servers = self.servers.lock().expect("server store lock poisoned");
        let mut all: Vec<ServerConfig> = servers.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    fn upsert(&self, config: &ServerConfig) -> Result<()> {
        let mut servers = self.servers.lock().expect("server store lock poisoned");
        servers.insert(config.uuid.clone(), config.without_secrets());
        Ok(())
    }

    fn delete(&self, uuid: &str) -> Result<()> {
        let mut servers = self.servers.lock().expect("server store lock poisoned");
        servers.remove(uuid);
        Ok(())
    }
}
