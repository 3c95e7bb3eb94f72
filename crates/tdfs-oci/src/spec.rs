//! OCI image-spec documents: descriptors, indexes, manifests.
//!
//! Field names follow the OCI image specification; serde `rename`
//! attributes map them onto Rust naming. Unknown attributes are ignored on
//! input, and optional attributes are omitted on output so re-serialized
//! documents stay minimal.

use crate::{OciError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Media types handled by the builder.
pub mod media_type {
    /// OCI image index
    pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    /// OCI image manifest
    pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    /// OCI image config
    pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    /// 2DFS field layer
    pub const TWODFS_FIELD: &str = "application/vnd.oci.image.layer.v1.2dfs.field";
    /// Monolithic blob upload body
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// Index annotation holding the canonical URL the index was pulled as.
pub const IMAGE_NAME_ANNOTATION: &str = "2dfs.image.name";
/// Standard OCI annotation rewritten when a field is attached.
pub const ANNOTATION_IMAGE_URL: &str = "org.opencontainers.image.url";
/// Standard OCI annotation rewritten when a field is attached.
pub const ANNOTATION_IMAGE_VERSION: &str = "org.opencontainers.image.version";

/// Literal content of the `oci-layout` marker file.
pub const OCI_LAYOUT_CONTENT: &[u8] = br#"{"imageLayoutVersion": "1.0.0"}"#;

/// A content digest in `algorithm:hex` form. All core paths require the
/// algorithm to be SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Wrap a bare lowercase hex SHA-256.
    pub fn from_sha256_hex(hex: &str) -> Self {
        Self(format!("sha256:{hex}"))
    }

    /// The algorithm prefix, empty when the digest carries none.
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or("")
    }

    /// The hex part, or the whole string for prefix-less digests.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, h)| h).unwrap_or(&self.0)
    }

    /// The hex part of a SHA-256 digest, or
    /// [`OciError::UnsupportedDigestAlgorithm`].
    pub fn sha256_hex(&self) -> Result<&str> {
        if self.algorithm() != "sha256" {
            return Err(OciError::UnsupportedDigestAlgorithm(
                self.algorithm().to_string(),
            ));
        }
        Ok(self.encoded())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// OCI content descriptor: a typed, sized pointer to a blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub digest: Digest,

    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<OciPlatform>,
}

impl OciDescriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            urls: None,
            annotations: None,
            platform: None,
        }
    }
}

/// Platform selector of a manifest descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciPlatform {
    pub architecture: String,

    pub os: String,

    #[serde(rename = "os.version", skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    #[serde(rename = "os.features", skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl fmt::Display for OciPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// OCI image index: the multi-platform entry point of an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    pub manifests: Vec<OciDescriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// OCI image manifest: config plus ordered layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    pub config: OciDescriptor,

    pub layers: Vec<OciDescriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// Parse an image index, surfacing failures as [`OciError::MalformedIndex`].
pub fn read_index(bytes: &[u8]) -> Result<OciIndex> {
    serde_json::from_slice(bytes).map_err(|e| OciError::MalformedIndex(e.to_string()))
}

/// Parse an image manifest, surfacing failures as
/// [`OciError::MalformedManifest`].
pub fn read_manifest(bytes: &[u8]) -> Result<OciManifest> {
    serde_json::from_slice(bytes).map_err(|e| OciError::MalformedManifest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_parts() {
        let digest = Digest::from_sha256_hex("abc123");
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.encoded(), "abc123");
        assert_eq!(digest.as_str(), "sha256:abc123");
        assert_eq!(digest.sha256_hex().unwrap(), "abc123");
    }

    #[test]
    fn non_sha256_digest_is_rejected() {
        let digest: Digest = serde_json::from_str("\"sha512:ffff\"").unwrap();
        assert!(matches!(
            digest.sha256_hex(),
            Err(OciError::UnsupportedDigestAlgorithm(algo)) if algo == "sha512"
        ));
    }

    #[test]
    fn manifest_roundtrip_keeps_wire_names() {
        let raw = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:aaaa",
                "size": 7
            },
            "layers": [{
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": "sha256:bbbb",
                "size": 42
            }]
        }"#;
        let manifest = read_manifest(raw).unwrap();
        assert_eq!(manifest.layers.len(), 1);

        let out = serde_json::to_string(&manifest).unwrap();
        assert!(out.contains("\"mediaType\""));
        assert!(out.contains("\"schemaVersion\""));
        assert!(!out.contains("annotations"));
    }

    #[test]
    fn malformed_documents_are_distinguished() {
        assert!(matches!(
            read_index(b"not json"),
            Err(OciError::MalformedIndex(_))
        ));
        assert!(matches!(
            read_manifest(b"{}"),
            Err(OciError::MalformedManifest(_))
        ));
    }
}
