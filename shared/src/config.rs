use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Locations and tuning knobs for the built-in cache backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    pub data_dir: PathBuf,
    pub file_cache_dir: String,
    pub database_file: String,
    pub db_busy_timeout_ms: u64,
    pub keychain_service: String,
    pub keychain_dir: String,
    pub preferences_path: Option<PathBuf>,
    pub preferences_prefix: String,
}

impl CacheSettings {
    const DEFAULT_DATA_DIR: &str = "./data/cache";
    const DEFAULT_FILE_CACHE_DIR: &str = "files";
    const DEFAULT_DATABASE_FILE: &str = "cache.sqlite3";
    const DEFAULT_DB_BUSY_TIMEOUT_MS: u64 = 250;
    const DEFAULT_KEYCHAIN_SERVICE: &str = "cachet.secure-store";
    const DEFAULT_KEYCHAIN_DIR: &str = "keychain";
    const DEFAULT_PREFERENCES_PREFIX: &str = "cachet.cache.";

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Build settings from `CACHET_*` environment variables. Host applications
    /// call this explicitly; nothing in the cache core reads the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let db_busy_timeout_ms = match lookup("CACHET_DB_BUSY_TIMEOUT_MS") {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                warn!(
                    "CACHET_DB_BUSY_TIMEOUT_MS='{}' is not a number, using {}",
                    raw,
                    Self::DEFAULT_DB_BUSY_TIMEOUT_MS
                );
                Self::DEFAULT_DB_BUSY_TIMEOUT_MS
            }),
            None => Self::DEFAULT_DB_BUSY_TIMEOUT_MS,
        };

        Self {
            data_dir: lookup("CACHET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            db_busy_timeout_ms,
            keychain_service: lookup("CACHET_KEYCHAIN_SERVICE")
                .unwrap_or(defaults.keychain_service),
            preferences_path: lookup("CACHET_PREFERENCES_PATH")
                .map(PathBuf::from)
                .or(defaults.preferences_path),
            preferences_prefix: lookup("CACHET_PREFERENCES_PREFIX")
                .unwrap_or(defaults.preferences_prefix),
            ..defaults
        }
    }

    pub fn file_cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_cache_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn keychain_path(&self) -> PathBuf {
        self.data_dir.join(&self.keychain_dir)
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.preferences_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("preferences.json"))
    }

    pub fn db_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.db_busy_timeout_ms)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(Self::DEFAULT_DATA_DIR),
            file_cache_dir: Self::DEFAULT_FILE_CACHE_DIR.to_string(),
            database_file: Self::DEFAULT_DATABASE_FILE.to_string(),
            db_busy_timeout_ms: Self::DEFAULT_DB_BUSY_TIMEOUT_MS,
            keychain_service: Self::DEFAULT_KEYCHAIN_SERVICE.to_string(),
            keychain_dir: Self::DEFAULT_KEYCHAIN_DIR.to_string(),
            preferences_path: None,
            preferences_prefix: Self::DEFAULT_PREFERENCES_PREFIX.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_derive_paths_from_data_dir() {
        let settings = CacheSettings::with_data_dir("/tmp/cachet-test");
        assert_eq!(settings.file_cache_path(), PathBuf::from("/tmp/cachet-test/files"));
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/tmp/cachet-test/cache.sqlite3")
        );
        assert_eq!(
            settings.preferences_file(),
            PathBuf::from("/tmp/cachet-test/preferences.json")
        );
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars = HashMap::from([
            ("CACHET_DATA_DIR", "/var/cache/app"),
            ("CACHET_DB_BUSY_TIMEOUT_MS", "900"),
            ("CACHET_KEYCHAIN_SERVICE", "com.example.app"),
            ("CACHET_PREFERENCES_PREFIX", "app."),
        ]);
        let settings = CacheSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.data_dir, PathBuf::from("/var/cache/app"));
        assert_eq!(settings.db_busy_timeout(), Duration::from_millis(900));
        assert_eq!(settings.keychain_service, "com.example.app");
        assert_eq!(settings.preferences_prefix, "app.");
        assert_eq!(settings.file_cache_dir, "files");
    }

    #[test]
    fn test_from_lookup_bad_number_falls_back() {
        let settings = CacheSettings::from_lookup(|k| {
            (k == "CACHET_DB_BUSY_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert_eq!(settings.db_busy_timeout_ms, 250);
    }
}
