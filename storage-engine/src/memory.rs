use cachet::ports::StorageBackend;
use moka::sync::Cache;
use shared::Result;
use std::fmt::Debug;

/// Moka-based in-process backend. Nothing survives the process.
pub struct MemoryBackend {
    entries: Cache<String, Vec<u8>>,
}

impl MemoryBackend {
    /// Create an unbounded in-memory backend
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: &str) -> Self {
        Self {
            entries: Cache::builder().name(name).build(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live entries, after pending maintenance has run
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn read_raw(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key))
    }

    fn write_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn clear_raw(&mut self, key: &str) -> Result<()> {
        self.entries.invalidate(key);
        Ok(())
    }

    fn clear_all_raw(&mut self) -> Result<()> {
        self.entries.invalidate_all();
        Ok(())
    }
}

impl Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}
