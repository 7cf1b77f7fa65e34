//! Session-scoped secrets for remote servers.
//!
//! Passwords and key passphrases typed at runtime live here for the rest
//! of the process lifetime and are never written to disk. The store is an
//! injected component: the factory and the authentication entry point
//! share one `Arc<CredentialStore>`.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;
use zeroize::Zeroizing;

/// In-memory map from server uuid to one secret.
///
/// No eviction and no size bound; entries live until removed. Overwritten
/// and removed secrets are zeroized.
#[derive(Default)]
pub struct CredentialStore {
    secrets: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a secret, replacing any previous one for `uuid`.
    pub fn put(&self, uuid: &str, secret: &str) {
        let mut secrets = self.secrets.write().expect("credential store lock poisoned");
        secrets.insert(uuid.to_string(), Zeroizing::new(secret.to_string()));
        debug!("Cached credential for server {uuid}");
    }

    pub fn get(&self, uuid: &str) -> Option<String> {
        let secrets = self.secrets.read().expect("credential store lock poisoned");
        secrets.get(uuid).map(|s| s.as_str().to_string())
    }

    pub fn contains(&self, uuid: &str) -> bool {
        let secrets = self.secrets.read().expect("credential store lock poisoned");
        secrets.contains_key(uuid)
    }

    /// Forget the secret for `uuid`. No-op if none is stored.
    pub fn remove(&self, uuid: &str) {
        let mut secrets = self.secrets.write().expect("credential store lock poisoned");
        if secrets.remove(uuid).is_some() {
            debug!("Dropped credential for server {uuid}");
        }
    }

    /// Forget every secret.
    pub fn clear(&self) {
        let mut secrets = self.secrets.write().expect("credential store lock poisoned");
        secrets.clear();
    }
}
