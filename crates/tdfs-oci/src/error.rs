//! OCI error types

use tdfs_cache::CacheError;
use tdfs_codec::CodecError;
use tdfs_field::FieldError;
use thiserror::Error;

/// Errors surfaced by image assembly, distribution and export.
#[derive(Debug, Error)]
pub enum OciError {
    /// Cache miss or remote 404
    #[error("not found: {0}")]
    NotFound(String),

    /// Digest check failed after a download or a self-produced write
    #[error("integrity check failed for {digest}, entry removed")]
    IntegrityFailure { digest: String },

    /// Only SHA-256 descriptors are supported
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    /// Manifest parse failure
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// Index parse failure
    #[error("malformed index: {0}")]
    MalformedIndex(String),

    /// The downloaded document is not an OCI image index
    #[error("invalid index media type: {0}")]
    InvalidIndexMediaType(String),

    /// Invalid image reference string
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Challenge could not be answered, or auth failed twice
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Registry refused an upload step
    #[error("upload rejected with status {0}")]
    UploadRejected(u16),

    /// Registry refused a download with a non-404 status
    #[error("download rejected with status {0}")]
    DownloadRejected(u16),

    /// Request deadline exceeded
    #[error("request timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Field error
    #[error(transparent)]
    Field(#[from] FieldError),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
}

impl From<reqwest::Error> for OciError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OciError::Timeout
        } else {
            OciError::Http(e)
        }
    }
}

pub type Result<T, E = OciError> = std::result::Result<T, E>;
