use archive::ArchiveCoder;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cachet::ports::StorageBackend;
use cachet::value::Value;
use parking_lot::RwLock;
use serde_json::{Map, Value as Json, json};
use shared::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DATA_TAG: &str = "$data";
const ARCHIVE_TAG: &str = "$archive";
const RAW_TAG: &str = "$raw";

#[derive(Default)]
struct Inner {
    path: Option<PathBuf>,
    values: BTreeMap<String, Json>,
}

/// Process-wide preference store with typed accessors, persisted as one JSON
/// document. Handles are cheap to clone and share the same state.
#[derive(Clone, Default)]
pub struct Preferences {
    inner: Arc<RwLock<Inner>>,
}

impl Preferences {
    /// Preferences that are never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load preferences from `path`, starting empty if the file doesn't exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("Preferences at {:?} are unreadable, starting empty: {}", path, e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                path: Some(path),
                values,
            })),
        })
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.read().path.clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().values.keys().cloned().collect()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.inner.read().values.get(key)?.as_bool()
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.inner.read().values.get(key)?.as_i64()
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.inner.read().values.get(key)?.as_f64()
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.inner.read().values.get(key)?.as_str().map(str::to_string)
    }

    pub fn data(&self, key: &str) -> Option<Vec<u8>> {
        self.tagged(key, DATA_TAG)
    }

    pub fn archive(&self, key: &str) -> Option<ArchiveCoder> {
        ArchiveCoder::from_bytes(&self.tagged(key, ARCHIVE_TAG)?).ok()
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, Json::Bool(value))
    }

    pub fn set_integer(&self, key: &str, value: i64) -> Result<()> {
        self.set(key, json!(value))
    }

    pub fn set_float(&self, key: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::Codec(format!("Cannot store non-finite float under '{}'", key)));
        }
        self.set(key, json!(value))
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, Json::String(value.to_string()))
    }

    pub fn set_data(&self, key: &str, value: &[u8]) -> Result<()> {
        self.set_tagged(key, DATA_TAG, value)
    }

    /// Non-primitive values go in as an archive record
    pub fn set_archive(&self, key: &str, value: &ArchiveCoder) -> Result<()> {
        self.set_tagged(key, ARCHIVE_TAG, &value.to_bytes()?)
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let Some(previous) = inner.values.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = synchronize(&inner) {
            inner.values.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    /// Remove every key starting with `prefix`, leaving the rest untouched
    pub fn remove_prefixed(&self, prefix: &str) -> Result<usize> {
        let mut inner = self.inner.write();
        let doomed: Vec<String> = inner
            .values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let removed: Vec<(String, Json)> = doomed
            .into_iter()
            .filter_map(|key| inner.values.remove(&key).map(|value| (key, value)))
            .collect();
        if let Err(e) = synchronize(&inner) {
            inner.values.extend(removed);
            return Err(e);
        }
        Ok(removed.len())
    }

    fn get(&self, key: &str) -> Option<Json> {
        self.inner.read().values.get(key).cloned()
    }

    /// Changes only stick once the document is on disk.
    fn set(&self, key: &str, value: Json) -> Result<()> {
        let mut inner = self.inner.write();
        let previous = inner.values.insert(key.to_string(), value);
        if let Err(e) = synchronize(&inner) {
            match previous {
                Some(previous) => inner.values.insert(key.to_string(), previous),
                None => inner.values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn tagged(&self, key: &str, tag: &str) -> Option<Vec<u8>> {
        let encoded = self.inner.read().values.get(key)?.get(tag)?.as_str()?.to_string();
        STANDARD.decode(encoded).ok()
    }

    fn set_tagged(&self, key: &str, tag: &str, bytes: &[u8]) -> Result<()> {
        let mut object = Map::new();
        object.insert(tag.to_string(), Json::String(STANDARD.encode(bytes)));
        self.set(key, Json::Object(object))
    }
}

fn synchronize(inner: &Inner) -> Result<()> {
    let Some(path) = inner.path.as_deref() else {
        return Ok(());
    };
    write_document(path, &inner.values)
}

fn write_document(path: &Path, values: &BTreeMap<String, Json>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let document = serde_json::to_vec_pretty(values)
        .map_err(|e| Error::Codec(format!("Failed to encode preferences: {}", e)))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, document)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Preferences")
            .field("path", &inner.path)
            .field("keys", &inner.values.len())
            .finish()
    }
}

/// Cache backend over [`Preferences`]. Cache keys live under a fixed prefix so
/// clearing the cache leaves the application's own preferences alone. Scalars
/// are stored natively; everything else is stored as data or an archive record.
#[derive(Debug)]
pub struct PreferencesBackend {
    preferences: Preferences,
    prefix: String,
}

impl PreferencesBackend {
    pub fn new(preferences: Preferences, prefix: impl Into<String>) -> Self {
        Self {
            preferences,
            prefix: prefix.into(),
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn stored_value(&self, key: &str) -> Option<Value> {
        let value = match self.preferences.get(key)? {
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64()?),
            },
            Json::String(s) => Value::Text(s),
            Json::Object(object) if object.contains_key(DATA_TAG) => {
                Value::from(self.preferences.data(key)?)
            }
            Json::Object(object) if object.contains_key(ARCHIVE_TAG) => {
                Value::Archive(self.preferences.archive(key)?)
            }
            _ => return None,
        };
        Some(value)
    }
}

impl StorageBackend for PreferencesBackend {
    fn read_raw(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.prefixed(key);
        if let Some(raw) = self.preferences.tagged(&key, RAW_TAG) {
            return Ok(Some(raw));
        }
        self.stored_value(&key).map(|v| v.to_bytes()).transpose()
    }

    fn write_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let key = self.prefixed(key);
        match Value::from_bytes(value) {
            Ok(Value::Bool(b)) => self.preferences.set_bool(&key, b),
            Ok(Value::Int(i)) => self.preferences.set_integer(&key, i),
            Ok(Value::Float(f)) if f.is_finite() => self.preferences.set_float(&key, f),
            Ok(Value::Text(s)) => self.preferences.set_string(&key, &s),
            Ok(Value::Bytes(b)) => self.preferences.set_data(&key, &b),
            Ok(Value::Archive(coder)) => self.preferences.set_archive(&key, &coder),
            _ => self.preferences.set_tagged(&key, RAW_TAG, value),
        }
    }

    fn clear_raw(&mut self, key: &str) -> Result<()> {
        self.preferences.remove(&self.prefixed(key))?;
        Ok(())
    }

    fn clear_all_raw(&mut self) -> Result<()> {
        let removed = self.preferences.remove_prefixed(&self.prefix)?;
        tracing::debug!("Removed {} cached preference(s) under '{}'", removed, self.prefix);
        Ok(())
    }
}
