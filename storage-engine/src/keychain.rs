use cachet::ports::StorageBackend;
use shared::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Account name under which the secure store keeps its own list of keys.
pub const KEYS_ACCOUNT: &str = "__KEYS__";

/// Credential storage addressed by (service, account), in the shape of a
/// platform keychain: lookup, save and delete, but no enumeration.
pub trait CredentialStore: Send + 'static {
    fn find(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>>;

    /// Add the secret or replace an existing one.
    fn save(&mut self, service: &str, account: &str, secret: &[u8]) -> Result<()>;

    fn delete(&mut self, service: &str, account: &str) -> Result<bool>;
}

/// Sled-based credential vault; one tree per service. Clones share the vault.
#[derive(Clone)]
pub struct SledKeychain {
    db: sled::Db,
}

impl SledKeychain {
    /// Open the vault, creating the parent directory if it doesn't exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open keychain: {}", e)))?;

        Ok(Self { db })
    }

    /// Vault that is deleted when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Storage(format!("Failed to open keychain: {}", e)))?;
        Ok(Self { db })
    }

    fn tree(&self, service: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(service)
            .map_err(|e| Error::Storage(format!("Failed to open service '{}': {}", service, e)))
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Storage(format!("Failed to flush keychain: {}", e)))?;
        Ok(())
    }
}

impl CredentialStore for SledKeychain {
    fn find(&self, service: &str, account: &str) -> Result<Option<Vec<u8>>> {
        let secret = self
            .tree(service)?
            .get(account.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to read secret: {}", e)))?;
        Ok(secret.map(|ivec| ivec.to_vec()))
    }

    fn save(&mut self, service: &str, account: &str, secret: &[u8]) -> Result<()> {
        self.tree(service)?
            .insert(account.as_bytes(), secret)
            .map_err(|e| Error::Storage(format!("Failed to save secret: {}", e)))?;
        self.flush()
    }

    fn delete(&mut self, service: &str, account: &str) -> Result<bool> {
        let removed = self
            .tree(service)?
            .remove(account.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to delete secret: {}", e)))?
            .is_some();
        self.flush()?;
        Ok(removed)
    }
}

/// Secure-store backend. Each cache key is an account under one service.
///
/// The credential store cannot list accounts, so the backend keeps the set of
/// keys it has written in a `__KEYS__` entry of the same service. The list is
/// read back from the store before every change, so handles sharing a service
/// see each other's keys. A secret is written before the list that names it; a
/// crash between the two leaves a secret `clear_all_raw` cannot see.
pub struct SecureStoreBackend<C: CredentialStore> {
    store: C,
    service: String,
}

impl<C: CredentialStore> SecureStoreBackend<C> {
    pub fn new(store: C, service: impl Into<String>) -> Self {
        Self {
            store,
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Keys the service's key list currently names
    pub fn known_keys(&self) -> Result<Vec<String>> {
        Ok(self.load_keys()?.into_iter().collect())
    }

    fn load_keys(&self) -> Result<BTreeSet<String>> {
        let Some(bytes) = self.store.find(&self.service, KEYS_ACCOUNT)? else {
            return Ok(BTreeSet::new());
        };
        Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(
                "Key list of service '{}' is unreadable, starting empty: {}",
                self.service,
                e
            );
            BTreeSet::new()
        }))
    }

    fn persist_keys(&mut self, keys: &BTreeSet<String>) -> Result<()> {
        if keys.is_empty() {
            self.store.delete(&self.service, KEYS_ACCOUNT)?;
            return Ok(());
        }
        let bytes = serde_json::to_vec(keys)
            .map_err(|e| Error::Codec(format!("Failed to encode key list: {}", e)))?;
        self.store.save(&self.service, KEYS_ACCOUNT, &bytes)
    }
}

fn reserved(key: &str) -> Result<()> {
    if key == KEYS_ACCOUNT {
        return Err(Error::Internal(format!("'{}' is reserved by the secure store", key)));
    }
    Ok(())
}

impl<C: CredentialStore> StorageBackend for SecureStoreBackend<C> {
    fn read_raw(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        reserved(key)?;
        self.store.find(&self.service, key)
    }

    fn write_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        reserved(key)?;
        self.store.save(&self.service, key, value)?;
        let mut keys = self.load_keys()?;
        if keys.insert(key.to_string()) {
            self.persist_keys(&keys)?;
        }
        Ok(())
    }

    fn clear_raw(&mut self, key: &str) -> Result<()> {
        reserved(key)?;
        self.store.delete(&self.service, key)?;
        let mut keys = self.load_keys()?;
        if keys.remove(key) {
            self.persist_keys(&keys)?;
        }
        Ok(())
    }

    fn clear_all_raw(&mut self) -> Result<()> {
        let mut keys = self.load_keys()?;
        while let Some(key) = keys.pop_first() {
            self.store.delete(&self.service, &key)?;
            // Keep the list in step so a failure part-way leaves the rest listed
            self.persist_keys(&keys)?;
        }
        self.store.delete(&self.service, KEYS_ACCOUNT)?;
        Ok(())
    }
}
