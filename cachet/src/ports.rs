#![deny(clippy::all)]

use crate::value::Value;
use archive::Archivable;
use shared::{Result, TtlMs};

// Ports are the pluggable extension points for underlying storage media

/// Raw byte storage a cache engine delegates to.
///
/// Implementations own their medium and key namespace. The engine serializes
/// every call, so `&mut self` state needs no locking of its own.
pub trait StorageBackend: Send + 'static {
    fn read_raw(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
    fn write_raw(&mut self, key: &str, value: &[u8]) -> Result<()>;
    fn clear_raw(&mut self, key: &str) -> Result<()>;
    fn clear_all_raw(&mut self) -> Result<()>;
}

/// Public cache contract consumed by the rest of the application.
///
/// Misses, expiry and backend failures all look the same to callers: `None`
/// on reads and `false` on writes.
pub trait Cache: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn object(&self, key: &str) -> Option<Value>;

    fn set_object(&self, key: &str, value: Option<Value>) -> bool {
        self.set_object_with_expire(key, value, TtlMs::PERMANENT)
    }

    fn set_object_with_expire(&self, key: &str, value: Option<Value>, ttl: TtlMs) -> bool;

    fn remove_object(&self, key: &str) -> bool;

    fn remove_all_objects(&self) -> bool;
}

/// Typed helpers over [`Cache`] for archivable values.
pub trait CacheExt: Cache {
    fn archived_object<T: Archivable>(&self, key: &str) -> Option<T> {
        self.object(key)?.unarchive::<T>()
    }

    fn archived_objects<T: Archivable>(&self, key: &str) -> Option<Vec<T>> {
        self.object(key)?.unarchive_many::<T>()
    }

    fn set_archived_object<T: Archivable>(&self, key: &str, value: &T, ttl: TtlMs) -> bool {
        self.set_object_with_expire(key, Some(Value::archived(value)), ttl)
    }

    fn set_archived_objects<T: Archivable>(&self, key: &str, values: &[T], ttl: TtlMs) -> bool {
        self.set_object_with_expire(key, Some(Value::archived_many(values)), ttl)
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
