//! Keyed cache engine with per-key expiration over pluggable raw storage.

pub mod clock;
pub mod engine;
pub mod ports;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EXPIRE_SUFFIX, ExpiringCache, expire_key};
pub use ports::{Cache, CacheExt, StorageBackend};
pub use value::Value;
