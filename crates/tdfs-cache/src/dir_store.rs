//! Directory-backed store: one flat file per entry, named by its key.

use crate::store::{CacheStore, EntryWrite};
use crate::{CacheError, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// Production store backed by a flat directory of digest-named files.
pub struct DirectoryStore {
    path: PathBuf,
    mtx: Arc<Mutex<()>>,
}

impl DirectoryStore {
    /// Open a store rooted at `path`. Fails unless `path` is an existing
    /// directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path)?;
        if !meta.is_dir() {
            return Err(CacheError::NotADirectory(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            mtx: Arc::new(Mutex::new(())),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.path.join(key)
    }
}

struct DirEntryWriter {
    inner: BufWriter<NamedTempFile>,
    dest: PathBuf,
    mtx: Arc<Mutex<()>>,
}

impl Write for DirEntryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl EntryWrite for DirEntryWriter {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.inner.flush()?;
        let tmp = self
            .inner
            .into_inner()
            .map_err(|e| CacheError::Io(e.into_error()))?;
        // Rename under the store lock: visibility is atomic, last commit wins.
        let _guard = self.mtx.lock().unwrap();
        tmp.persist(&self.dest).map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }
}

impl CacheStore for DirectoryStore {
    fn get(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let _guard = self.mtx.lock().unwrap();
        match File::open(self.entry_path(key)) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn size(&self, key: &str) -> Result<u64> {
        let _guard = self.mtx.lock().unwrap();
        match fs::metadata(self.entry_path(key)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn add(&self, key: &str) -> Result<Box<dyn EntryWrite>> {
        let _guard = self.mtx.lock().unwrap();
        let tmp = tempfile::Builder::new()
            .prefix(".stage-")
            .tempfile_in(&self.path)?;
        Ok(Box::new(DirEntryWriter {
            inner: BufWriter::new(tmp),
            dest: self.entry_path(key),
            mtx: Arc::clone(&self.mtx),
        }))
    }

    fn del(&self, key: &str) -> Result<()> {
        let _guard = self.mtx.lock().unwrap();
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn check(&self, key: &str) -> bool {
        let file = match File::open(self.entry_path(key)) {
            Ok(file) => file,
            Err(_) => return false,
        };
        let digest = match tdfs_codec::sha256_hex(BufReader::new(file)) {
            Ok(digest) => digest,
            Err(_) => return false,
        };
        if digest.as_deref() != Some(key) {
            tracing::warn!(key = %key, "invalidated cache entry");
            let _ = self.del(key);
            return false;
        }
        true
    }

    fn list(&self) -> Result<Vec<String>> {
        let _guard = self.mtx.lock().unwrap();
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    // staged writers share the directory, keep them out
                    if !name.starts_with(".stage-") {
                        entries.push(name);
                    }
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdfs_codec::sha256_hex_of;

    fn open_store() -> (DirectoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn open_rejects_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            DirectoryStore::open(&file),
            Err(CacheError::NotADirectory(_))
        ));
    }

    #[test]
    fn put_get_roundtrip() {
        let (store, _dir) = open_store();
        let data = b"some layer bytes";
        let key = sha256_hex_of(data);

        store.put(&key, data).unwrap();
        assert_eq!(store.read_all(&key).unwrap(), data);
        assert_eq!(store.size(&key).unwrap(), data.len() as u64);
        assert_eq!(store.list().unwrap(), vec![key]);
    }

    #[test]
    fn get_missing_is_not_found() {
        let (store, _dir) = open_store();
        assert!(matches!(
            store.get("deadbeef"),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn check_accepts_valid_entry() {
        let (store, _dir) = open_store();
        let data = b"valid entry";
        let key = sha256_hex_of(data);
        store.put(&key, data).unwrap();
        assert!(store.check(&key));
        assert!(store.get(&key).is_ok());
    }

    #[test]
    fn check_evicts_tampered_entry() {
        let (store, dir) = open_store();
        let data = b"original bytes";
        let key = sha256_hex_of(data);
        store.put(&key, data).unwrap();

        fs::write(dir.path().join(&key), b"tampered").unwrap();
        assert!(!store.check(&key));
        assert!(matches!(
            store.get(&key),
            Err(CacheError::NotFound { .. })
        ));
    }

    #[test]
    fn check_evicts_empty_entry() {
        let (store, dir) = open_store();
        let key = sha256_hex_of(b"anything");
        fs::write(dir.path().join(&key), b"").unwrap();
        assert!(!store.check(&key));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn del_is_idempotent() {
        let (store, _dir) = open_store();
        store.del("not-there").unwrap();
        store.del("not-there").unwrap();
    }

    #[test]
    fn uncommitted_writer_leaves_no_entry() {
        let (store, _dir) = open_store();
        {
            let mut writer = store.add("abc").unwrap();
            writer.write_all(b"discarded").unwrap();
            // dropped without commit
        }
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn last_commit_wins() {
        let (store, _dir) = open_store();
        let key = "contended";

        let mut first = store.add(key).unwrap();
        let mut second = store.add(key).unwrap();
        first.write_all(b"first").unwrap();
        second.write_all(b"second").unwrap();
        first.commit().unwrap();
        second.commit().unwrap();

        assert_eq!(store.read_all(key).unwrap(), b"second");
    }
}
