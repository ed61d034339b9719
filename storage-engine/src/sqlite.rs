use cachet::ports::StorageBackend;
use rusqlite::{Connection, OptionalExtension, params};
use shared::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
)";

fn storage_error(e: rusqlite::Error) -> Error {
    Error::Storage(format!("SQLite error: {}", e))
}

/// SQLite-backed storage with a single `cache(key, value)` table.
///
/// A connection is opened for every primitive and dropped when it returns, so
/// no handle outlives the call that needed it. The busy timeout bounds how long
/// a call may wait on a locked database file.
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&self.path).map_err(storage_error)?;
        conn.busy_timeout(self.busy_timeout).map_err(storage_error)?;
        conn.execute(CREATE_TABLE, []).map_err(storage_error)?;
        Ok(conn)
    }

    /// Keys currently stored, in key order
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare("SELECT key FROM cache ORDER BY key")
            .map_err(storage_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_error)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(storage_error)
    }
}

impl StorageBackend for SqliteBackend {
    fn read_raw(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT value FROM cache WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(storage_error)
    }

    fn write_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO cache (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(storage_error)?;
        Ok(())
    }

    fn clear_raw(&mut self, key: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM cache WHERE key = ?1", params![key])
            .map_err(storage_error)?;
        Ok(())
    }

    fn clear_all_raw(&mut self) -> Result<()> {
        let conn = self.open()?;
        conn.execute_batch("DELETE FROM cache; VACUUM;")
            .map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn backend(dir: &Path) -> SqliteBackend {
        SqliteBackend::new(dir.join("db").join("cache.sqlite3"), Duration::from_millis(100))
    }

    #[test]
    fn test_sqlite_upsert_and_read() {
        let temp = tempdir().unwrap();
        let mut backend = backend(temp.path());

        backend.write_raw("k", b"one").unwrap();
        backend.write_raw("k", b"two").unwrap();

        assert_eq!(backend.read_raw("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.keys().unwrap(), vec!["k".to_string()]);
        assert!(backend.path().exists());
    }

    #[test]
    fn test_sqlite_read_missing_creates_table() {
        let temp = tempdir().unwrap();
        let mut backend = backend(temp.path());
        assert_eq!(backend.read_raw("missing").unwrap(), None);
    }

    #[test]
    fn test_sqlite_clear() {
        let temp = tempdir().unwrap();
        let mut backend = backend(temp.path());

        backend.write_raw("a", b"1").unwrap();
        backend.write_raw("b", b"2").unwrap();
        backend.clear_raw("a").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["b".to_string()]);

        backend.clear_all_raw().unwrap();
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn test_sqlite_data_survives_new_handle() {
        let temp = tempdir().unwrap();
        backend(temp.path()).write_raw("k", b"persisted").unwrap();

        let mut reopened = backend(temp.path());
        assert_eq!(reopened.read_raw("k").unwrap(), Some(b"persisted".to_vec()));
    }

    #[test]
    fn test_sqlite_no_connection_held_between_calls() {
        let temp = tempdir().unwrap();
        let mut backend = backend(temp.path());
        backend.write_raw("k", b"v").unwrap();

        // Another connection can take an exclusive lock between calls
        let conn = Connection::open(backend.path()).unwrap();
        conn.execute_batch("BEGIN EXCLUSIVE; DELETE FROM cache; COMMIT;")
            .unwrap();
        drop(conn);

        assert_eq!(backend.read_raw("k").unwrap(), None);
    }

    #[test]
    fn test_sqlite_unopenable_path_is_an_error() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let mut backend = SqliteBackend::new(blocker.join("cache.sqlite3"), Duration::from_millis(10));
        assert!(backend.write_raw("k", b"v").is_err());
        assert!(backend.read_raw("k").is_err());
    }
}
