//! The store abstraction shared by the directory and in-memory backends.

use crate::Result;
use std::io::{Read, Write};

/// A staged cache write. Bytes become visible under the entry's key only
/// when [`EntryWrite::commit`] is called; dropping the writer discards them.
pub trait EntryWrite: Write + Send {
    /// Publish the entry. Replaces any concurrent write for the same key.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A content-addressed key→bytes store.
///
/// Implementations serialize mutating operations per store; readers obtain
/// streams that stay valid independently of later mutations.
pub trait CacheStore: Send + Sync {
    /// Open a reader for the entry, or [`crate::CacheError::NotFound`].
    fn get(&self, key: &str) -> Result<Box<dyn Read + Send>>;

    /// Size in bytes of the stored entry.
    fn size(&self, key: &str) -> Result<u64>;

    /// Stage a new entry under `key`.
    fn add(&self, key: &str) -> Result<Box<dyn EntryWrite>>;

    /// Remove the entry. Removing an absent key is a no-op.
    fn del(&self, key: &str) -> Result<()>;

    /// Verify that the stored bytes hash to `key`. On mismatch (including an
    /// empty entry) the entry is deleted and `false` is returned.
    fn check(&self, key: &str) -> bool;

    /// Keys of all entries directly inside the store.
    fn list(&self) -> Result<Vec<String>>;

    /// Write a full buffer under `key` and commit it.
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut writer = self.add(key)?;
        writer.write_all(data)?;
        writer.commit()
    }

    /// Read the whole entry into memory. Intended for small entries
    /// (indexes, manifests, key records), not layers.
    fn read_all(&self, key: &str) -> Result<Vec<u8>> {
        let mut reader = self.get(key)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
