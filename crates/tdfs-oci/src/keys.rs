//! Records of the `uncompressed-keys` store.
//!
//! Each entry is named by the content digest of an allotment source file
//! and lists the layer variants already built from it. A record maps the
//! diff-ID (digest of the uncompressed layer tar) to the compressed blob
//! digest, so rebuilding the same file at the same destination skips the
//! compression step entirely. The GC rewrites records to drop diff-IDs no
//! longer referenced by any field.

use crate::{OciError, Result};
use serde::{Deserialize, Serialize};

/// One cached compression result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCacheKey {
    /// Digest of the uncompressed layer tar.
    #[serde(rename = "diffid")]
    pub diff_id: String,
    /// Digest of the compressed blob in the blob store.
    pub digest: String,
    /// Destination path the file was packed under.
    #[serde(rename = "filename", default)]
    pub file_name: String,
}

/// The full record stored per source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeys {
    pub keys: Vec<FileCacheKey>,
}

impl CacheKeys {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(OciError::Serialization)
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
