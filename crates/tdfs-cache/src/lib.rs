//! Content-addressed stores backing the 2DFS build cache.
//!
//! Every entry is a flat file named by the lowercase hex SHA-256 of its
//! bytes. Three logically separate namespaces share this layout: `blobs`
//! (layers, configs, manifests, allotments), `index` (OCI indexes keyed by
//! the digest of their canonical URL) and `uncompressed-keys` (diff-ID
//! records used to skip recompression). Writers stage into a temp file and
//! rename on commit, so a new entry becomes visible atomically and the last
//! committed writer for a key wins.

mod dir_store;
mod mem_store;
mod paths;
mod store;

pub use dir_store::DirectoryStore;
pub use mem_store::MemoryStore;
pub use paths::{StorePaths, Stores};
pub use store::{CacheStore, EntryWrite};

use std::path::PathBuf;
use thiserror::Error;

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry not found in the store
    #[error("cache entry {key} not found")]
    NotFound { key: String },

    /// Store path exists but is not a directory
    #[error("store path {0} is not a directory")]
    NotADirectory(PathBuf),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
