//! Resolution of backend ids to [`Filesystem`] instances.
//!
//! `"local"` and `"root"` are reserved ids; every other id is the uuid of a
//! stored [`ServerConfig`]. Creating a filesystem never opens a connection;
//! remote sessions are established lazily by the first operation.
//!
//! # Example
//!
//! ```ignore
//! let factory = FilesystemFactory::new(servers, credentials, config);
//! match factory.create(&uuid) {
//!     Err(FactoryError::AuthenticationRequired(_)) => {
//!         factory.authenticate(&uuid, &prompt_password());
//!     }
//!     Ok(fs) => { /* use fs */ }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::backends::{
    LocalFilesystem, PrivilegedShell, RootFilesystem, LOCAL_BACKEND_ID, ROOT_BACKEND_ID,
};
use crate::config::CoreConfig;
use crate::credential::CredentialStore;
use crate::errors::{FactoryError, FileError};
use crate::files::Filesystem;
use crate::server::{Scheme, ServerConfig, ServerStore};

pub struct FilesystemFactory {
    servers: Arc<dyn ServerStore>,
    credentials: Arc<CredentialStore>,
    config: CoreConfig,
}

/// Convert a store failure, keeping a typed [`FactoryError`] when the store
/// reported one.
fn storage_error(err: anyhow::Error) -> FactoryError {
    match err.downcast::<FactoryError>() {
        Ok(factory_err) => factory_err,
        Err(other) => FactoryError::Storage(format!("{other:#}")),
    }
}

impl FilesystemFactory {
    pub fn new(
        servers: Arc<dyn ServerStore>,
        credentials: Arc<CredentialStore>,
        config: CoreConfig,
    ) -> Self {
        Self {
            servers,
            credentials,
            config,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Build the filesystem for `backend_id`.
    pub fn create(&self, backend_id: &str) -> Result<Arc<dyn Filesystem>, FactoryError> {
        match backend_id {
            LOCAL_BACKEND_ID => Ok(Arc::new(LocalFilesystem::new())),
            ROOT_BACKEND_ID => Ok(Arc::new(RootFilesystem::new(PrivilegedShell::new(
                self.config.root_command.clone(),
                self.config.root_command_args.clone(),
            )))),
            uuid => {
                let server = self.load(uuid)?;
                let server = match self.credentials.get(uuid) {
                    Some(secret) => server.with_secret(&secret),
                    None => server,
                };
                if !server.is_complete() {
                    debug!("Server {uuid} has no cached secret");
                    return Err(FactoryError::AuthenticationRequired(uuid.to_string()));
                }
                self.build_remote(server)
            }
        }
    }

    /// Cache `secret` for the server `uuid`.
    pub fn authenticate(&self, uuid: &str, secret: &str) {
        self.credentials.put(uuid, secret);
    }

    /// Check `secret` against the server and cache it only if the server
    /// accepts it.
    pub async fn verify_credentials(&self, uuid: &str, secret: &str) -> anyhow::Result<()> {
        let server = self.load(uuid)?.with_secret(secret);
        let fs = self.build_remote(server)?;
        fs.ping().await?;
        self.credentials.put(uuid, secret);
        info!("Credentials verified for server {uuid}");
        Ok(())
    }

    /// All stored servers, without secrets.
    pub fn servers(&self) -> Result<Vec<ServerConfig>, FactoryError> {
        self.servers.load_all().map_err(storage_error)
    }

    /// Add or replace a server. The cached secret is dropped; a secret on
    /// `config` becomes the new cached secret.
    pub fn save_server(&self, config: &ServerConfig) -> Result<(), FactoryError> {
        config.validate()?;
        self.servers
            .upsert(&config.without_secrets())
            .map_err(storage_error)?;
        self.credentials.remove(&config.uuid);
        if let Some(secret) = config.secret() {
            self.credentials.put(&config.uuid, secret);
        }
        info!("Saved server {} ({})", config.name, config.uuid);
        Ok(())
    }

    pub fn delete_server(&self, uuid: &str) -> Result<(), FactoryError> {
        self.servers.delete(uuid).map_err(storage_error)?;
        self.credentials.remove(uuid);
        info!("Deleted server {uuid}");
        Ok(())
    }

    fn load(&self, uuid: &str) -> Result<ServerConfig, FactoryError> {
        let server = self
            .servers
            .load_server(uuid)
            .map_err(storage_error)?
            .ok_or_else(|| FactoryError::UnknownBackend(uuid.to_string()))?;
        server.validate()?;
        Ok(server)
    }

    fn build_remote(&self, server: ServerConfig) -> Result<Arc<dyn Filesystem>, FactoryError> {
        debug!("Creating {} filesystem for server {}", server.scheme, server.uuid);
        match server.scheme {
            Scheme::Ftp | Scheme::Ftps | Scheme::Ftpes => self.build_ftp(server),
            Scheme::Sftp => self.build_sftp(server),
        }
    }

    #[cfg(feature = "ftp")]
    fn build_ftp(&self, server: ServerConfig) -> Result<Arc<dyn Filesystem>, FactoryError> {
        use crate::backends::ftp::{FtpFilesystem, FtpSecurity};
        let security = FtpSecurity::for_scheme(server.scheme)
            .ok_or_else(|| FactoryError::UnsupportedScheme(server.scheme.to_string()))?;
        Ok(Arc::new(
            FtpFilesystem::new(server, security, self.config.connect_timeout())
                .accept_invalid_certs(self.config.accept_invalid_certs),
        ))
    }

    #[cfg(not(feature = "ftp"))]
    fn build_ftp(&self, server: ServerConfig) -> Result<Arc<dyn Filesystem>, FactoryError> {
        Err(FactoryError::UnsupportedScheme(server.scheme.to_string()))
    }

    #[cfg(feature = "sftp")]
    fn build_sftp(&self, server: ServerConfig) -> Result<Arc<dyn Filesystem>, FactoryError> {
        use crate::backends::sftp::SftpFilesystem;
        Ok(Arc::new(SftpFilesystem::new(
            server,
            self.config.connect_timeout(),
        )))
    }

    #[cfg(not(feature = "sftp"))]
    fn build_sftp(&self, server: ServerConfig) -> Result<Arc<dyn Filesystem>, FactoryError> {
        Err(FactoryError::UnsupportedScheme(server.scheme.to_string()))
    }
}

impl From<FactoryError> for FileError {
    fn from(err: FactoryError) -> Self {
        match err {
            FactoryError::AuthenticationRequired(uuid) => FileError::AuthenticationFailed(uuid),
            FactoryError::UnknownBackend(id) => FileError::NotFound(id),
            FactoryError::UnsupportedScheme(s) => FileError::Unsupported(s),
            other => FileError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::BackendKind;
    use crate::server::{AuthMethod, MemoryServerStore};

    fn factory_with(servers: &[ServerConfig]) -> FilesystemFactory {
        let store = Arc::new(MemoryServerStore::new());
        for server in servers {
            store.upsert(server).unwrap();
        }
        FilesystemFactory::new(store, Arc::new(CredentialStore::new()), CoreConfig::default())
    }

    #[test]
    fn reserved_ids() {
        let factory = factory_with(&[]);
        assert_eq!(factory.create("local").unwrap().kind(), BackendKind::Local);
        assert_eq!(factory.create("root").unwrap().kind(), BackendKind::Root);
    }

    #[test]
    fn unknown_id() {
        let factory = factory_with(&[]);
        assert_eq!(
            factory.create("nope").err(),
            Some(FactoryError::UnknownBackend("nope".into()))
        );
    }

    #[test]
    fn password_server_requires_authentication() {
        let server = ServerConfig::new(Scheme::Ftp, "box", "10.0.0.1", "dev");
        let factory = factory_with(std::slice::from_ref(&server));

        assert_eq!(
            factory.create(&server.uuid).err(),
            Some(FactoryError::AuthenticationRequired(server.uuid.clone()))
        );

        factory.authenticate(&server.uuid, "secret");
        let fs = factory.create(&server.uuid).unwrap();
        assert_eq!(fs.kind(), BackendKind::Remote(Scheme::Ftp));
        assert_eq!(fs.backend_id(), server.uuid);
    }

    #[cfg(all(feature = "ftp", feature = "sftp"))]
    #[test]
    fn kind_follows_scheme() {
        let servers: Vec<ServerConfig> = [Scheme::Ftp, Scheme::Ftps, Scheme::Ftpes, Scheme::Sftp]
            .into_iter()
            .map(|scheme| ServerConfig::new(scheme, "s", "h", "u"))
            .collect();
        let factory = factory_with(&servers);
        for server in &servers {
            factory.authenticate(&server.uuid, "pw");
            let fs = factory.create(&server.uuid).unwrap();
            assert_eq!(fs.kind(), BackendKind::Remote(server.scheme));
        }
    }

    #[test]
    fn key_server_needs_key_and_passphrase() {
        let mut server = ServerConfig::new(Scheme::Sftp, "s", "h", "u");
        server.auth_method = AuthMethod::Key;
        let factory = factory_with(std::slice::from_ref(&server));
        factory.authenticate(&server.uuid, "passphrase");
        // No key_id yet.
        assert!(matches!(
            factory.create(&server.uuid),
            Err(FactoryError::AuthenticationRequired(_))
        ));

        server.key_id = Some("~/.ssh/id_ed25519".into());
        factory.save_server(&server).unwrap();
        factory.authenticate(&server.uuid, "passphrase");
        assert!(factory.create(&server.uuid).is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut server = ServerConfig::new(Scheme::Ftp, "s", "h", "u");
        server.auth_method = AuthMethod::Key;
        let factory = factory_with(&[]);
        assert!(matches!(
            factory.save_server(&server),
            Err(FactoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn saving_replaces_cached_secret() {
        let server = ServerConfig::new(Scheme::Sftp, "s", "h", "u");
        let factory = factory_with(std::slice::from_ref(&server));
        factory.authenticate(&server.uuid, "old");

        factory.save_server(&server).unwrap();
        assert!(!factory.credentials().contains(&server.uuid));

        factory.save_server(&server.with_secret("new")).unwrap();
        assert_eq!(factory.credentials().get(&server.uuid).as_deref(), Some("new"));
        assert!(factory.servers().unwrap()[0].password.is_none());
    }

    #[test]
    fn deleting_drops_secret() {
        let server = ServerConfig::new(Scheme::Ftp, "s", "h", "u");
        let factory = factory_with(std::slice::from_ref(&server));
        factory.authenticate(&server.uuid, "pw");
        factory.delete_server(&server.uuid).unwrap();
        assert!(!factory.credentials().contains(&server.uuid));
        assert!(matches!(
            factory.create(&server.uuid),
            Err(FactoryError::UnknownBackend(_))
        ));
    }

    #[cfg(feature = "ftp")]
    #[tokio::test]
    async fn failed_verification_does_not_cache() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut server = ServerConfig::new(Scheme::Ftp, "dead", "127.0.0.1", "u");
        server.port = port;
        let factory = factory_with(std::slice::from_ref(&server));

        let err = factory.verify_credentials(&server.uuid, "pw").await.unwrap_err();
        assert!(err.downcast_ref::<FileError>().is_some_and(FileError::is_retryable));
        assert!(!factory.credentials().contains(&server.uuid));
    }

    #[test]
    fn factory_errors_convert_to_file_errors() {
        let err: FileError = FactoryError::AuthenticationRequired("u".into()).into();
        assert!(err.needs_credentials());
    }
}
