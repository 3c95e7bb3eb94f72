//! Shared fixtures: a minimal OCI image and a wiremock-backed registry.
#![allow(dead_code)] // each test binary uses a different subset

use tdfs_oci::media_type;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Lowercase hex SHA-256 of a buffer.
pub fn hex_digest(bytes: &[u8]) -> String {
    tdfs_codec::sha256_hex_of(bytes)
}

/// A complete single-platform image held in memory.
pub struct FakeImage {
    pub config: Vec<u8>,
    pub layers: Vec<Vec<u8>>,
    pub manifest: Vec<u8>,
    pub index: Vec<u8>,
}

impl FakeImage {
    pub fn manifest_hex(&self) -> String {
        hex_digest(&self.manifest)
    }

    pub fn config_hex(&self) -> String {
        hex_digest(&self.config)
    }

    pub fn layer_hexes(&self) -> Vec<String> {
        self.layers.iter().map(|layer| hex_digest(layer)).collect()
    }
}

/// Build an image with `layer_count` distinct layers.
pub fn fake_image(layer_count: usize) -> FakeImage {
    let config = br#"{"architecture":"amd64","os":"linux"}"#.to_vec();
    let layers: Vec<Vec<u8>> = (0..layer_count)
        .map(|i| format!("layer-{i}-content").into_bytes())
        .collect();

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": media_type::IMAGE_MANIFEST,
        "config": {
            "mediaType": media_type::IMAGE_CONFIG,
            "digest": format!("sha256:{}", hex_digest(&config)),
            "size": config.len(),
        },
        "layers": layers.iter().map(|layer| serde_json::json!({
            "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
            "digest": format!("sha256:{}", hex_digest(layer)),
            "size": layer.len(),
        })).collect::<Vec<_>>(),
        "annotations": {
            "org.opencontainers.image.version": "latest",
        },
    });
    let manifest = serde_json::to_vec(&manifest).unwrap();

    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": media_type::IMAGE_INDEX,
        "manifests": [{
            "mediaType": media_type::IMAGE_MANIFEST,
            "digest": format!("sha256:{}", hex_digest(&manifest)),
            "size": manifest.len(),
            "platform": {"os": "linux", "architecture": "amd64"},
        }],
    });
    let index = serde_json::to_vec(&index).unwrap();

    FakeImage {
        config,
        layers,
        manifest,
        index,
    }
}

/// Serve the image under `/v2/{repo}` with no authentication.
pub async fn mount_registry(server: &MockServer, repo: &str, image: &FakeImage) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{repo}/manifests/latest")))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(image.index.clone(), media_type::IMAGE_INDEX),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/v2/{repo}/manifests/sha256:{}",
            image.manifest_hex()
        )))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(image.manifest.clone(), media_type::IMAGE_MANIFEST),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/v2/{repo}/blobs/sha256:{}",
            image.config_hex()
        )))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(image.config.clone(), media_type::IMAGE_CONFIG),
        )
        .mount(server)
        .await;

    for layer in &image.layers {
        Mock::given(method("GET"))
            .and(path(format!(
                "/v2/{repo}/blobs/sha256:{}",
                hex_digest(layer)
            )))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(layer.clone(), media_type::OCTET_STREAM),
            )
            .mount(server)
            .await;
    }
}

/// The pullable reference for a repo on the mock server.
pub fn reference_for(server: &MockServer, repo: &str) -> String {
    let host = server
        .uri()
        .strip_prefix("http://")
        .expect("mock server uri is http")
        .to_string();
    format!("{host}/{repo}:latest")
}

/// Matches requests that carry no `Authorization` header.
pub struct NoAuthHeader;

impl Match for NoAuthHeader {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("authorization")
    }
}
