use crate::file::FileBackend;
use crate::keychain::{SecureStoreBackend, SledKeychain};
use crate::memory::MemoryBackend;
use crate::preferences::{Preferences, PreferencesBackend};
use crate::sqlite::SqliteBackend;
use cachet::clock::{Clock, SystemClock};
use cachet::engine::ExpiringCache;
use cachet::ports::{Cache, StorageBackend};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use shared::Result;
use shared::config::CacheSettings;
use std::fmt::Debug;
use std::sync::Arc;

/// Logical cache selector. `Default` is the file cache.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Default,
    Memory,
    UserPreferences,
    SecureStore,
    File,
    Database,
    Custom(String),
}

impl CacheKind {
    pub fn as_str(&self) -> &str {
        match self {
            CacheKind::Default => "default",
            CacheKind::Memory => "memory",
            CacheKind::UserPreferences => "user-preferences",
            CacheKind::SecureStore => "secure-store",
            CacheKind::File => "file",
            CacheKind::Database => "database",
            CacheKind::Custom(name) => name,
        }
    }
}

/// Override hook consulted before the built-in caches on every lookup.
pub type CacheFactory = dyn Fn(&CacheKind) -> Option<Arc<dyn Cache>> + Send + Sync;

/// Hands out one cache per kind, built lazily on first use and kept for the
/// life of the manager.
pub struct CacheManager {
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    factory: RwLock<Option<Arc<CacheFactory>>>,
    memory: OnceCell<Arc<dyn Cache>>,
    file: OnceCell<Arc<dyn Cache>>,
    database: OnceCell<Arc<dyn Cache>>,
    secure_store: OnceCell<Arc<dyn Cache>>,
    user_preferences: OnceCell<Arc<dyn Cache>>,
    preferences: OnceCell<Preferences>,
}

static GLOBAL: Lazy<CacheManager> = Lazy::new(|| CacheManager::new(CacheSettings::default()));

impl CacheManager {
    pub fn new(settings: CacheSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            factory: RwLock::new(None),
            memory: OnceCell::new(),
            file: OnceCell::new(),
            database: OnceCell::new(),
            secure_store: OnceCell::new(),
            user_preferences: OnceCell::new(),
            preferences: OnceCell::new(),
        }
    }

    /// Process-wide manager using default settings
    pub fn global() -> &'static CacheManager {
        &GLOBAL
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn set_factory(
        &self,
        factory: impl Fn(&CacheKind) -> Option<Arc<dyn Cache>> + Send + Sync + 'static,
    ) {
        *self.factory.write() = Some(Arc::new(factory));
    }

    pub fn clear_factory(&self) {
        *self.factory.write() = None;
    }

    /// Resolve a cache kind: the override factory first, then the built-in
    /// singleton for that kind. Custom kinds nobody provides resolve to `None`.
    pub fn manager(&self, kind: &CacheKind) -> Option<Arc<dyn Cache>> {
        let factory = self.factory.read().clone();
        if let Some(cache) = factory.and_then(|factory| factory(kind)) {
            return Some(cache);
        }

        let settings = &self.settings;
        match kind {
            CacheKind::Default | CacheKind::File => self.singleton(&self.file, "file", || {
                Ok(FileBackend::new(settings.file_cache_path()))
            }),
            CacheKind::Memory => self.singleton(&self.memory, "memory", || Ok(MemoryBackend::new())),
            CacheKind::Database => self.singleton(&self.database, "database", || {
                Ok(SqliteBackend::new(
                    settings.database_path(),
                    settings.db_busy_timeout(),
                ))
            }),
            CacheKind::SecureStore => self.singleton(&self.secure_store, "secure-store", || {
                let keychain = SledKeychain::open(settings.keychain_path())?;
                Ok(SecureStoreBackend::new(
                    keychain,
                    settings.keychain_service.clone(),
                ))
            }),
            CacheKind::UserPreferences => {
                self.singleton(&self.user_preferences, "user-preferences", || {
                    Ok(PreferencesBackend::new(
                        self.preferences()?,
                        settings.preferences_prefix.clone(),
                    ))
                })
            }
            CacheKind::Custom(name) => {
                tracing::debug!("No cache registered for custom kind '{}'", name);
                None
            }
        }
    }

    /// The preference store behind the user-preferences cache, shared with
    /// anything else in the process that keeps preferences.
    pub fn preferences(&self) -> Result<Preferences> {
        self.preferences
            .get_or_try_init(|| Preferences::open(self.settings.preferences_file()))
            .cloned()
    }

    fn singleton<B: StorageBackend>(
        &self,
        cell: &OnceCell<Arc<dyn Cache>>,
        name: &str,
        build: impl FnOnce() -> Result<B>,
    ) -> Option<Arc<dyn Cache>> {
        let cache = cell.get_or_try_init(|| {
            let backend = build()?;
            tracing::debug!("Created '{}' cache", name);
            Ok::<_, shared::Error>(Arc::new(ExpiringCache::with_clock(
                name,
                backend,
                self.clock.clone(),
            )) as Arc<dyn Cache>)
        });

        match cache {
            Ok(cache) => Some(cache.clone()),
            Err(e) => {
                tracing::warn!("Cache '{}' is unavailable: {}", name, e);
                None
            }
        }
    }
}

impl Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("settings", &self.settings)
            .field("has_factory", &self.factory.read().is_some())
            .finish()
    }
}

/// Look a cache up on the process-wide manager.
pub fn manager(kind: &CacheKind) -> Option<Arc<dyn Cache>> {
    CacheManager::global().manager(kind)
}
