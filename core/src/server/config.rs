use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::FactoryError;

/// Protocol discriminator for remote servers.
///
/// Adding a scheme is a compile-time change: every dispatch on `Scheme`
/// is an exhaustive `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Ftp,
    /// FTP over implicit TLS.
    Ftps,
    /// FTP upgraded with `AUTH TLS`.
    Ftpes,
    Sftp,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ftp => "ftp",
            Scheme::Ftps => "ftps",
            Scheme::Ftpes => "ftpes",
            Scheme::Sftp => "sftp",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Ftp | Scheme::Ftpes => 21,
            Scheme::Ftps => 990,
            Scheme::Sftp => 22,
        }
    }

    pub fn supports_key_auth(&self) -> bool {
        matches!(self, Scheme::Sftp)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(Scheme::Ftp),
            "ftps" => Ok(Scheme::Ftps),
            "ftpes" => Ok(Scheme::Ftpes),
            "sftp" => Ok(Scheme::Sftp),
            other => Err(FactoryError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Password,
    Key,
}

/// A remote server definition.
///
/// `password` and `passphrase` are session secrets: they are filled in from
/// the [`CredentialStore`](crate::credential::CredentialStore) right before
/// a backend is built and are never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub uuid: String,
    pub scheme: Scheme,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub initial_dir: String,
    pub auth_method: AuthMethod,
    pub username: String,
    /// Private key path for [`AuthMethod::Key`].
    pub key_id: Option<String>,
    pub password: Option<String>,
    pub passphrase: Option<String>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &Option<String>| s.as_ref().map(|_| "<redacted>");
        f.debug_struct("ServerConfig")
            .field("uuid", &self.uuid)
            .field("scheme", &self.scheme)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("initial_dir", &self.initial_dir)
            .field("auth_method", &self.auth_method)
            .field("username", &self.username)
            .field("key_id", &self.key_id)
            .field("password", &redact(&self.password))
            .field("passphrase", &redact(&self.passphrase))
            .finish()
    }
}

impl ServerConfig {
    /// A password-authenticated server with a fresh uuid and the scheme's
    /// default port.
    pub fn new(scheme: Scheme, name: &str, address: &str, username: &str) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            scheme,
            name: name.to_string(),
            address: address.to_string(),
            port: scheme.default_port(),
            initial_dir: "/".to_string(),
            auth_method: AuthMethod::Password,
            username: username.to_string(),
            key_id: None,
            password: None,
            passphrase: None,
        }
    }

    /// The secret that `auth_method` requires, if present.
    pub fn secret(&self) -> Option<&str> {
        let secret = match self.auth_method {
            AuthMethod::Password => self.password.as_deref(),
            AuthMethod::Key => self.passphrase.as_deref(),
        };
        secret.filter(|s| !s.is_empty())
    }

    /// Whether the config carries everything needed to open a session.
    pub fn is_complete(&self) -> bool {
        match self.auth_method {
            AuthMethod::Password => self.secret().is_some(),
            AuthMethod::Key => {
                self.secret().is_some() && self.key_id.as_deref().is_some_and(|k| !k.is_empty())
            }
        }
    }

    /// Copy with `secret` stored in the field `auth_method` selects.
    pub fn with_secret(&self, secret: &str) -> Self {
        let mut config = self.clone();
        match config.auth_method {
            AuthMethod::Password => config.password = Some(secret.to_string()),
            AuthMethod::Key => config.passphrase = Some(secret.to_string()),
        }
        config
    }

    /// Copy with both secret fields cleared.
    pub fn without_secrets(&self) -> Self {
        Self {
            password: None,
            passphrase: None,
            ..self.clone()
        }
    }

    /// Structural checks that do not involve secrets.
    pub fn validate(&self) -> Result<(), FactoryError> {
        if self.uuid.trim().is_empty() {
            return Err(FactoryError::InvalidConfig("uuid is empty".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(FactoryError::InvalidConfig(format!(
                "server '{}' has no address",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(FactoryError::InvalidConfig(format!(
                "server '{}' has port 0",
                self.name
            )));
        }
        if self.username.trim().is_empty() {
            return Err(FactoryError::InvalidConfig(format!(
                "server '{}' has no username",
                self.name
            )));
        }
        if self.auth_method == AuthMethod::Key && !self.scheme.supports_key_auth() {
            return Err(FactoryError::InvalidConfig(format!(
                "key authentication is not available over {}",
                self.scheme
            )));
        }
        Ok(())
    }

    /// `host:port` for socket connections.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Persisted shape of a [`ServerConfig`]: no secret fields, scheme kept as
/// text so an unknown scheme is reported instead of failing the whole file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub uuid: String,
    pub scheme: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default = "default_initial_dir")]
    pub initial_dir: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

fn default_initial_dir() -> String {
    "/".to_string()
}

impl From<&ServerConfig> for ServerRecord {
    fn from(config: &ServerConfig) -> Self {
        Self {
            uuid: config.uuid.clone(),
            scheme: config.scheme.to_string(),
            name: config.name.clone(),
            address: config.address.clone(),
            port: config.port,
            initial_dir: config.initial_dir.clone(),
            auth_method: config.auth_method,
            username: config.username.clone(),
            key_id: config.key_id.clone(),
        }
    }
}

impl TryFrom<ServerRecord> for ServerConfig {
    type Error = FactoryError;

    fn try_from(record: ServerRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            scheme: record.scheme.parse()?,
            uuid: record.uuid,
            name: record.name,
            address: record.address,
            port: record.port,
            initial_dir: record.initial_dir,
            auth_method: record.auth_method,
            username: record.username,
            key_id: record.key_id,
            password: None,
            passphrase: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sftp_key_server() -> ServerConfig {
        ServerConfig {
            auth_method: AuthMethod::Key,
            key_id: Some("~/.ssh/id_ed25519".to_string()),
            ..ServerConfig::new(Scheme::Sftp, "box", "10.0.0.2", "dev")
        }
    }

    #[test]
    fn scheme_parse_and_display() {
        for scheme in [Scheme::Ftp, Scheme::Ftps, Scheme::Ftpes, Scheme::Sftp] {
            assert_eq!(scheme.to_string().parse::<Scheme>().unwrap(), scheme);
        }
        assert_eq!("SFTP".parse::<Scheme>().unwrap(), Scheme::Sftp);
        assert_eq!(
            "webdav".parse::<Scheme>().unwrap_err(),
            FactoryError::UnsupportedScheme("webdav".into())
        );
    }

    #[test]
    fn default_ports() {
        assert_eq!(ServerConfig::new(Scheme::Ftps, "a", "h", "u").port, 990);
        assert_eq!(ServerConfig::new(Scheme::Ftpes, "a", "h", "u").port, 21);
        assert_eq!(ServerConfig::new(Scheme::Sftp, "a", "h", "u").port, 22);
    }

    #[test]
    fn password_completeness() {
        let config = ServerConfig::new(Scheme::Ftp, "a", "h", "u");
        assert!(!config.is_complete());
        assert!(!config.with_secret("").is_complete());
        let complete = config.with_secret("hunter2");
        assert!(complete.is_complete());
        assert_eq!(complete.password.as_deref(), Some("hunter2"));
        assert!(complete.passphrase.is_none());
    }

    #[test]
    fn key_completeness_needs_key_and_passphrase() {
        let config = sftp_key_server();
        assert!(!config.is_complete());
        let complete = config.with_secret("phrase");
        assert_eq!(complete.passphrase.as_deref(), Some("phrase"));
        assert!(complete.is_complete());

        let no_key = ServerConfig {
            key_id: None,
            ..complete
        };
        assert!(!no_key.is_complete());
    }

    #[test]
    fn without_secrets_clears_both() {
        let config = sftp_key_server().with_secret("phrase");
        let stripped = config.without_secrets();
        assert!(stripped.password.is_none());
        assert!(stripped.passphrase.is_none());
        assert_eq!(stripped.key_id, config.key_id);
    }

    #[test]
    fn validate_rejects_key_auth_over_ftp() {
        let config = ServerConfig {
            auth_method: AuthMethod::Key,
            ..ServerConfig::new(Scheme::Ftp, "a", "h", "u")
        };
        assert!(matches!(
            config.validate(),
            Err(FactoryError::InvalidConfig(_))
        ));
        assert!(sftp_key_server().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let mut config = ServerConfig::new(Scheme::Ftp, "a", "", "u");
        assert!(config.validate().is_err());
        config.address = "h".into();
        config.port = 0;
        assert!(config.validate().is_err());
        config.port = 21;
        config.username = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = ServerConfig::new(Scheme::Ftp, "a", "h", "u").with_secret("hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn record_round_trip_drops_secrets() {
        let config = sftp_key_server().with_secret("phrase");
        let record = ServerRecord::from(&config);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("phrase"));
        assert!(json.contains("\"authMethod\":\"key\""));

        let parsed: ServerRecord = serde_json::from_str(&json).unwrap();
        let restored = ServerConfig::try_from(parsed).unwrap();
        assert_eq!(restored, config.without_secrets());
    }

    #[test]
    fn record_with_unknown_scheme_fails() {
        let json = r#"{"uuid":"u1","scheme":"gopher","name":"n","address":"h","port":70,"username":"u"}"#;
        let record: ServerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            ServerConfig::try_from(record).unwrap_err(),
            FactoryError::UnsupportedScheme("gopher".into())
        );
    }
}
