//! Store locations and the bundle of open stores handed to the assembler.

use crate::{CacheStore, DirectoryStore, MemoryStore, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Locations of the three cache namespaces. Injected everywhere a store is
/// opened so tests can point at isolated temp directories.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub blobs: PathBuf,
    pub index: PathBuf,
    pub uncompressed_keys: PathBuf,
}

impl StorePaths {
    /// Standard layout under a base directory: `blobs/`, `index/`,
    /// `uncompressed-keys/`.
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            blobs: base.join("blobs"),
            index: base.join("index"),
            uncompressed_keys: base.join("uncompressed-keys"),
        }
    }

    /// Default location, `$HOME/.2dfs`. `None` when no home directory can
    /// be determined.
    pub fn default_home() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".2dfs")))
    }

    /// Create the store directories if missing.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.blobs)?;
        fs::create_dir_all(&self.index)?;
        fs::create_dir_all(&self.uncompressed_keys)?;
        Ok(())
    }

    /// Remove all three store directories. Used by `image rm --all`.
    pub fn remove_all(&self) -> Result<()> {
        for dir in [&self.blobs, &self.index, &self.uncompressed_keys] {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// The three open stores.
#[derive(Clone)]
pub struct Stores {
    pub blobs: Arc<dyn CacheStore>,
    pub index: Arc<dyn CacheStore>,
    pub uncompressed_keys: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Stores {
    /// Open directory-backed stores, creating the directories on first use.
    pub fn open(paths: &StorePaths) -> Result<Self> {
        paths.ensure()?;
        Ok(Self {
            blobs: Arc::new(DirectoryStore::open(&paths.blobs)?),
            index: Arc::new(DirectoryStore::open(&paths.index)?),
            uncompressed_keys: Arc::new(DirectoryStore::open(&paths.uncompressed_keys)?),
        })
    }

    /// Memory-backed stores for tests.
    pub fn in_memory() -> Self {
        Self {
            blobs: Arc::new(MemoryStore::new()),
            index: Arc::new(MemoryStore::new()),
            uncompressed_keys: Arc::new(MemoryStore::new()),
        }
    }
}
