//! Digest and archive primitives shared by the 2DFS builder.
//!
//! Blobs are addressed by the lowercase hex SHA-256 of their bytes, and
//! layer archives must be byte-reproducible so that the same input folder
//! always produces the same digest. Reproducibility is achieved by pinning
//! every tar entry timestamp to `2000-01-01T00:00:00Z` and walking the
//! source folder in a sorted order.

mod archive;
mod digest;

pub use archive::{archive_folder, compress_folder, decompress_archive, ARCHIVE_EPOCH};
pub use digest::{sha256_hex, sha256_hex_of};

use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory walk error
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// A file escaped the archive root
    #[error("path {0} is not inside the archive root")]
    PathOutsideRoot(String),
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;
