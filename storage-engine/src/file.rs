use cachet::ports::StorageBackend;
use shared::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_128;

/// One file per key inside a dedicated directory.
///
/// File names are a hash of the key, so keys may contain any characters. The
/// directory is created on first write and removed wholesale by `clear_all_raw`.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable file name for a key
    pub fn file_name(key: &str) -> String {
        format!("{:032x}", xxh3_128(key.as_bytes()))
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }
}

impl StorageBackend for FileBackend {
    fn read_raw(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        // Write beside the target and rename so readers never see a torn file
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn clear_raw(&mut self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn clear_all_raw(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_name_is_stable_and_opaque() {
        let name = FileBackend::file_name("user/42:avatar");
        assert_eq!(name, FileBackend::file_name("user/42:avatar"));
        assert_ne!(name, FileBackend::file_name("user/43:avatar"));
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_directory_created_on_first_write() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("nested").join("cache");
        let mut backend = FileBackend::new(&dir);

        assert_eq!(backend.read_raw("k").unwrap(), None);
        assert!(!dir.exists());

        backend.write_raw("k", b"v").unwrap();
        assert!(backend.path_for("k").exists());
        assert_eq!(backend.read_raw("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_clear_one_and_all() {
        let temp = tempdir().unwrap();
        let mut backend = FileBackend::new(temp.path().join("files"));

        backend.write_raw("a", b"1").unwrap();
        backend.write_raw("b", b"2").unwrap();
        backend.clear_raw("a").unwrap();
        backend.clear_raw("a").unwrap();
        assert_eq!(backend.read_raw("a").unwrap(), None);
        assert_eq!(backend.read_raw("b").unwrap(), Some(b"2".to_vec()));

        backend.clear_all_raw().unwrap();
        assert!(!backend.dir().exists());
        backend.clear_all_raw().unwrap();
        assert_eq!(backend.read_raw("b").unwrap(), None);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp = tempdir().unwrap();
        let mut backend = FileBackend::new(temp.path());
        backend.write_raw("k", b"first").unwrap();
        backend.write_raw("k", b"second").unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![FileBackend::file_name("k")]);
    }

    #[test]
    fn test_unwritable_directory_is_an_error() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"not a dir").unwrap();

        let mut backend = FileBackend::new(blocker.join("cache"));
        assert!(backend.write_raw("k", b"v").is_err());
    }
}
