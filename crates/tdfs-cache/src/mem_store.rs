//! In-memory store used by tests and dry runs.

use crate::store::{CacheStore, EntryWrite};
use crate::{CacheError, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

/// Memory-backed store with the same visibility semantics as
/// [`crate::DirectoryStore`]: writes land only on commit, last commit wins.
#[derive(Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemEntryWriter {
    key: String,
    buf: Vec<u8>,
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Write for MemEntryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl EntryWrite for MemEntryWriter {
    fn commit(self: Box<Self>) -> Result<()> {
        self.entries.lock().unwrap().insert(self.key, self.buf);
        Ok(())
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(CacheError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    fn size(&self, key: &str) -> Result<u64> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| CacheError::NotFound {
                key: key.to_string(),
            })
    }

    fn add(&self, key: &str) -> Result<Box<dyn EntryWrite>> {
        Ok(Box::new(MemEntryWriter {
            key: key.to_string(),
            buf: Vec::new(),
            entries: Arc::clone(&self.entries),
        }))
    }

    fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn check(&self, key: &str) -> bool {
        let digest = {
            let entries = self.entries.lock().unwrap();
            match entries.get(key) {
                Some(bytes) if !bytes.is_empty() => Some(tdfs_codec::sha256_hex_of(bytes)),
                Some(_) => None,
                None => return false,
            }
        };
        if digest.as_deref() != Some(key) {
            let _ = self.del(key);
            return false;
        }
        true
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdfs_codec::sha256_hex_of;

    #[test]
    fn behaves_like_directory_store() {
        let store = MemoryStore::new();
        let data = b"bytes";
        let key = sha256_hex_of(data);

        store.put(&key, data).unwrap();
        assert!(store.check(&key));
        assert_eq!(store.read_all(&key).unwrap(), data);

        store.put(&key, b"not the digest of this").unwrap();
        assert!(!store.check(&key));
        assert!(store.list().unwrap().is_empty());
    }
}
