//! Assembler tests: cache hydration, the integrity gate, and field
//! attachment.

mod support;

use std::fs;
use std::time::Duration;
use support::{fake_image, hex_digest, mount_registry, reference_for};
use tdfs_cache::Stores;
use tdfs_field::TwoDfsManifest;
use tdfs_oci::{media_type, ContainerImage, ImageReference, OciError, PullOptions, RegistryClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_client() -> RegistryClient {
    RegistryClient::new()
        .with_protocol("http")
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn pull_hydrates_every_blob() {
    let server = MockServer::start().await;
    let image = fake_image(2);
    mount_registry(&server, "test/app", &image).await;

    let stores = Stores::in_memory();
    let reference = reference_for(&server, "test/app");
    let pulled = ContainerImage::pull(
        stores.clone(),
        http_client(),
        &reference,
        PullOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(pulled.manifests().len(), 1);
    assert_eq!(pulled.manifests()[0].layers.len(), 2);

    let parsed = ImageReference::parse(&reference).unwrap();
    assert!(stores.index.get(&parsed.url_key()).is_ok());
    assert!(stores.blobs.check(&image.manifest_hex()));
    assert!(stores.blobs.check(&image.config_hex()));
    for hex in image.layer_hexes() {
        assert!(stores.blobs.check(&hex));
    }

    // The cached index annotation records the canonical URL.
    let index = pulled.index();
    assert_eq!(
        index
            .annotations
            .as_ref()
            .and_then(|a| a.get(tdfs_oci::IMAGE_NAME_ANNOTATION))
            .map(String::as_str),
        Some(parsed.canonical_url().as_str())
    );
}

#[tokio::test]
async fn second_pull_is_served_from_cache() {
    let server = MockServer::start().await;
    let image = fake_image(1);
    mount_registry(&server, "test/app", &image).await;

    let stores = Stores::in_memory();
    let reference = reference_for(&server, "test/app");

    ContainerImage::pull(
        stores.clone(),
        http_client(),
        &reference,
        PullOptions::default(),
    )
    .await
    .unwrap();

    // With everything cached, a re-pull must not touch the registry.
    server.reset().await;
    ContainerImage::pull(
        stores.clone(),
        http_client(),
        &reference,
        PullOptions::default(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn corrupted_download_does_not_persist() {
    let server = MockServer::start().await;
    let image = fake_image(1);
    let layer_hex = image.layer_hexes().remove(0);

    // Serve index and manifest faithfully, but hand back wrong layer bytes.
    Mock::given(method("GET"))
        .and(path("/v2/test/app/manifests/latest"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(image.index.clone(), media_type::IMAGE_INDEX),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/v2/test/app/manifests/sha256:{}",
            image.manifest_hex()
        )))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(image.manifest.clone(), media_type::IMAGE_MANIFEST),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/v2/test/app/blobs/sha256:{}",
            image.config_hex()
        )))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(image.config.clone(), media_type::IMAGE_CONFIG),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/test/app/blobs/sha256:{layer_hex}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"not the layer at all".to_vec(), media_type::OCTET_STREAM),
        )
        .mount(&server)
        .await;

    let stores = Stores::in_memory();
    let err = ContainerImage::pull(
        stores.clone(),
        http_client(),
        &reference_for(&server, "test/app"),
        PullOptions::default(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, OciError::IntegrityFailure { ref digest } if *digest == layer_hex),
        "got {err:?}"
    );
    assert!(stores.blobs.get(&layer_hex).is_err());
}

#[tokio::test]
async fn non_sha256_descriptor_fails_the_pull() {
    let server = MockServer::start().await;

    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": media_type::IMAGE_INDEX,
        "manifests": [{
            "mediaType": media_type::IMAGE_MANIFEST,
            "digest": "sha512:0000",
            "size": 1,
        }],
    });
    Mock::given(method("GET"))
        .and(path("/v2/test/app/manifests/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(serde_json::to_vec(&index).unwrap(), media_type::IMAGE_INDEX),
        )
        .mount(&server)
        .await;

    let err = ContainerImage::pull(
        Stores::in_memory(),
        http_client(),
        &reference_for(&server, "test/app"),
        PullOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(
        matches!(err, OciError::UnsupportedDigestAlgorithm(ref algo) if algo == "sha512"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn platform_filter_drops_non_matching_manifests() {
    let server = MockServer::start().await;
    let image = fake_image(1);
    mount_registry(&server, "test/app", &image).await;

    let err = ContainerImage::pull(
        Stores::in_memory(),
        http_client(),
        &reference_for(&server, "test/app"),
        PullOptions {
            platforms: vec!["linux/arm64".to_string()],
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, OciError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn add_field_appends_a_2dfs_layer_and_rewrites_the_image() {
    let server = MockServer::start().await;
    let image = fake_image(2);
    mount_registry(&server, "test/app", &image).await;

    let stores = Stores::in_memory();
    let reference = reference_for(&server, "test/app");
    let mut pulled = ContainerImage::pull(
        stores.clone(),
        http_client(),
        &reference,
        PullOptions::default(),
    )
    .await
    .unwrap();

    let src_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().join("motd");
    fs::write(&src, b"welcome to the field").unwrap();

    let manifest = TwoDfsManifest::parse(
        format!(
            r#"{{"allotments":[{{"src":"{}","dst":"/etc/motd","row":0,"col":0}}]}}"#,
            src.display()
        )
        .as_bytes(),
    )
    .unwrap();

    let old_key = pulled.index_key().to_string();
    pulled.add_field(&manifest, "example.com/team/app:v2").unwrap();

    // S4: two layers became three, the new one carrying the field.
    let layers = &pulled.manifests()[0].layers;
    assert_eq!(layers.len(), 3);
    let field_layer = layers.last().unwrap();
    assert_eq!(field_layer.media_type, media_type::TWODFS_FIELD);

    let field = pulled.field().unwrap();
    let field_bytes = field.marshal();
    assert_eq!(field_layer.digest.encoded(), hex_digest(&field_bytes));
    assert_eq!(field_layer.size, field_bytes.len() as u64);
    assert!(stores.blobs.check(field_layer.digest.encoded()));

    // The allotment blob and its compression record exist.
    let allotment = field.iter_allotments().next().unwrap();
    assert_eq!(allotment.file_name, "etc/motd");
    assert!(!allotment.cache_key.is_empty());
    assert!(stores.blobs.check(&allotment.digest));

    // The index moved to the new URL key; manifest digests were reissued.
    let new_key = ImageReference::parse("example.com/team/app:v2")
        .unwrap()
        .url_key();
    assert_eq!(pulled.index_key(), new_key);
    assert!(stores.index.get(&new_key).is_ok());
    assert!(stores.index.get(&old_key).is_err());

    let reissued = pulled.index().manifests[0].digest.encoded().to_string();
    assert_ne!(reissued, image.manifest_hex());
    assert!(stores.blobs.check(&reissued));
}

#[tokio::test]
async fn rebuilding_the_same_allotment_skips_recompression() {
    let server = MockServer::start().await;
    let image = fake_image(1);
    mount_registry(&server, "test/app", &image).await;

    let stores = Stores::in_memory();
    let reference = reference_for(&server, "test/app");
    let mut pulled = ContainerImage::pull(
        stores.clone(),
        http_client(),
        &reference,
        PullOptions::default(),
    )
    .await
    .unwrap();

    let src_dir = tempfile::tempdir().unwrap();
    let src = src_dir.path().join("data.bin");
    fs::write(&src, b"stable content").unwrap();

    let manifest = TwoDfsManifest::parse(
        format!(
            r#"{{"allotments":[{{"src":"{}","dst":"/opt/data.bin","row":0,"col":0}}]}}"#,
            src.display()
        )
        .as_bytes(),
    )
    .unwrap();

    pulled.add_field(&manifest, "example.com/team/app:v2").unwrap();
    let first = pulled.field().unwrap().iter_allotments().next().unwrap().clone();

    // A second build from the same source reuses digest and diff-ID.
    let mut again = ContainerImage::local(
        stores.clone(),
        http_client(),
        "example.com/team/app:v2",
        &[],
    )
    .unwrap();
    again.add_field(&manifest, "example.com/team/app:v3").unwrap();
    let second = again.field().unwrap().iter_allotments().next().unwrap().clone();

    assert_eq!(first.digest, second.digest);
    assert_eq!(first.cache_key, second.cache_key);
}
