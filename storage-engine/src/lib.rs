//! Storage backends for the cache engine and the manager that hands them out.

pub mod file;
pub mod keychain;
pub mod manager;
pub mod memory;
pub mod preferences;
pub mod sqlite;

pub use file::FileBackend;
pub use keychain::{CredentialStore, KEYS_ACCOUNT, SecureStoreBackend, SledKeychain};
pub use manager::{CacheFactory, CacheKind, CacheManager, manager};
pub use memory::MemoryBackend;
pub use preferences::{Preferences, PreferencesBackend};
pub use sqlite::SqliteBackend;
