use crate::clock::{Clock, SystemClock};
use crate::ports::{Cache, StorageBackend};
use crate::value::Value;
use parking_lot::Mutex;
use shared::{Result, TtlMs};
use std::fmt::Debug;
use std::sync::Arc;

/// Suffix of the companion record that holds a key's expiration time.
pub const EXPIRE_SUFFIX: &str = ".__EXPIRE__";

pub fn expire_key(key: &str) -> String {
    format!("{}{}", key, EXPIRE_SUFFIX)
}

/// Key-value cache with per-key expiration on top of a raw [`StorageBackend`].
///
/// Every public operation holds the instance mutex from start to finish, so the
/// value record and its expiration record are never observed half-updated by
/// another caller. Expired entries are purged lazily by the read that finds them.
pub struct ExpiringCache<B: StorageBackend> {
    name: String,
    backend: Mutex<B>,
    clock: Arc<dyn Clock>,
}

impl<B: StorageBackend> ExpiringCache<B> {
    pub fn new(name: impl Into<String>, backend: B) -> Self {
        Self::with_clock(name, backend, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, backend: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            backend: Mutex::new(backend),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if key.is_empty() {
            return None;
        }
        let mut backend = self.backend.lock();

        match self.is_expired(&mut *backend, key) {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!("Key '{}' in cache '{}' expired, purging", key, self.name);
                self.absorb("purge", key, purge(&mut *backend, key));
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read expiration of '{}' in cache '{}': {}",
                    key,
                    self.name,
                    e
                );
                return None;
            }
        }

        let bytes = self.absorb("read", key, backend.read_raw(key))??;
        match Value::from_bytes(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Dropping undecodable entry '{}' in cache '{}': {}", key, self.name, e);
                None
            }
        }
    }

    /// Store `value` under `key`. `None` removes the key; a zero TTL makes the
    /// entry permanent and drops any earlier expiration.
    pub fn set(&self, key: &str, value: Option<Value>, ttl: TtlMs) -> bool {
        if key.is_empty() {
            return false;
        }
        let Some(value) = value else {
            return self.remove(key);
        };
        let bytes = match value.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Failed to encode '{}' for cache '{}': {}", key, self.name, e);
                return false;
            }
        };

        let mut backend = self.backend.lock();
        let expiration = if ttl.is_permanent() {
            backend.clear_raw(&expire_key(key))
        } else {
            let expires_at = self.clock.now_ms().saturating_add(ttl.0);
            Value::Int(i64::try_from(expires_at).unwrap_or(i64::MAX))
                .to_bytes()
                .and_then(|record| backend.write_raw(&expire_key(key), &record))
        };

        if self.absorb("write expiration", key, expiration).is_none() {
            return false;
        }
        if self.absorb("write", key, backend.write_raw(key, &bytes)).is_some() {
            return true;
        }

        // The earlier value must not outlive a failed write under the new deadline
        self.absorb("drop stale", key, purge(&mut *backend, key));
        false
    }

    pub fn remove(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let mut backend = self.backend.lock();
        self.absorb("remove", key, purge(&mut *backend, key)).is_some()
    }

    pub fn remove_all(&self) -> bool {
        let mut backend = self.backend.lock();
        self.absorb("clear", "*", backend.clear_all_raw()).is_some()
    }

    /// Run `f` against the backend while holding the cache lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut *self.backend.lock())
    }

    fn is_expired(&self, backend: &mut B, key: &str) -> Result<bool> {
        let Some(record) = backend.read_raw(&expire_key(key))? else {
            return Ok(false);
        };
        // An unreadable expiration record cannot vouch for the entry.
        let expired = match Value::from_bytes(&record) {
            Ok(Value::Int(at)) => u64::try_from(at).unwrap_or(0) <= self.clock.now_ms(),
            _ => true,
        };
        Ok(expired)
    }

    fn absorb<T>(&self, op: &str, key: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    "Cache '{}' failed to {} '{}': {}",
                    self.name,
                    op,
                    key,
                    e
                );
                None
            }
        }
    }
}

fn purge<B: StorageBackend>(backend: &mut B, key: &str) -> Result<()> {
    backend.clear_raw(&expire_key(key))?;
    backend.clear_raw(key)
}

impl<B: StorageBackend> Cache for ExpiringCache<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn object(&self, key: &str) -> Option<Value> {
        self.get(key)
    }

    fn set_object_with_expire(&self, key: &str, value: Option<Value>, ttl: TtlMs) -> bool {
        self.set(key, value, ttl)
    }

    fn remove_object(&self, key: &str) -> bool {
        self.remove(key)
    }

    fn remove_all_objects(&self) -> bool {
        self.remove_all()
    }
}

impl<B: StorageBackend> Debug for ExpiringCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("name", &self.name)
            .field("backend", &std::any::type_name::<B>())
            .finish()
    }
}
