pub mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::CoreError;

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "FSDOCK_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.json";
const SERVERS_FILE_NAME: &str = "servers.json";

/// Runtime settings for the core. Every field has a default, so an absent
/// or partial `config.json` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// TCP connect timeout for remote backends.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Elevation binary used by the root backend.
    #[serde(default = "default_root_command")]
    pub root_command: String,
    /// Arguments placed between the elevation binary and the script.
    #[serde(default = "default_root_command_args")]
    pub root_command_args: Vec<String>,
    /// Accept self-signed certificates on FTPS and FTPES servers.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fsdock")
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_root_command() -> String {
    "su".to_string()
}

fn default_root_command_args() -> Vec<String> {
    vec!["-c".to_string()]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            connect_timeout_secs: default_connect_timeout_secs(),
            root_command: default_root_command(),
            root_command_args: default_root_command_args(),
            accept_invalid_certs: false,
        }
    }
}

impl CoreConfig {
    /// Load from a JSON file. Returns defaults (rooted at the file's
    /// directory) if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_dir);
        if !path.exists() {
            return Ok(Self {
                config_dir: dir,
                ..Self::default()
            });
        }
        let data = std::fs::read_to_string(path)?;
        let mut config: CoreConfig = serde_json::from_str(&data)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        if !data.contains("\"configDir\"") {
            config.config_dir = dir;
        }
        Ok(config)
    }

    /// Resolve the config directory (honoring [`CONFIG_DIR_ENV`]) and load
    /// `config.json` from it.
    pub fn from_env() -> Result<Self, CoreError> {
        let dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_config_dir(),
        };
        info!("Using config directory: {}", dir.display());
        Self::load(&dir.join(CONFIG_FILE_NAME))
    }

    pub fn servers_file(&self) -> PathBuf {
        self.config_dir.join(SERVERS_FILE_NAME)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Write the config as pretty JSON into `config_dir`.
    pub fn save(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.config_dir)?;
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(self.config_dir.join(CONFIG_FILE_NAME), data)?;
        Ok(())
    }
}
