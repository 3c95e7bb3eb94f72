//! Image assembly over the content-addressed cache.
//!
//! A [`ContainerImage`] is a view over the cache for one reference: its
//! index, its (possibly platform-filtered) manifests and, once attached,
//! its 2DFS field. [`ContainerImage::pull`] hydrates the view from a
//! registry, [`ContainerImage::local`] from the cache alone, and
//! [`ContainerImage::add_field`] rewrites the image into a new reference
//! carrying an extra field layer.
//!
//! Within one assembly the ordering is fixed: the index is persisted before
//! its manifests are parsed, a manifest is persisted and integrity-checked
//! before its blobs are fetched, the field blob lands before the manifests
//! that point at it are rewritten, and the rewritten index is stored under
//! its new URL key before the old key is dropped.

use crate::client::RegistryClient;
use crate::keys::{CacheKeys, FileCacheKey};
use crate::reference::ImageReference;
use crate::spec::{
    media_type, read_index, read_manifest, Digest, OciDescriptor, OciIndex, OciManifest,
    ANNOTATION_IMAGE_URL, ANNOTATION_IMAGE_VERSION, IMAGE_NAME_ANNOTATION,
};
use crate::{OciError, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use tdfs_cache::{CacheError, Stores};
use tdfs_field::{Allotment, AllotmentRequest, Field, FieldError, TwoDfsManifest};
use tokio::sync::Semaphore;

const DEFAULT_LAYER_FAN_OUT: usize = 3;

/// Knobs for [`ContainerImage::pull`].
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Re-download the index even when a cached copy exists.
    pub force_pull: bool,
    /// Keep only manifests whose platform is listed (`os/arch`). Empty
    /// keeps everything.
    pub platforms: Vec<String>,
    /// Concurrent layer downloads per manifest. `0` picks the default.
    pub layer_fan_out: usize,
}

/// An assembled view over the cache for one image reference.
#[derive(Debug)]
pub struct ContainerImage {
    pub(crate) reference: ImageReference,
    pub(crate) url: String,
    pub(crate) index_key: String,
    pub(crate) index: OciIndex,
    pub(crate) manifests: Vec<OciManifest>,
    pub(crate) field: Option<Field>,
    pub(crate) stores: Stores,
    pub(crate) client: RegistryClient,
    fan_out: usize,
}

impl ContainerImage {
    /// Resolve `url` against the registry, hydrating index, manifests,
    /// configs and layers into the cache.
    pub async fn pull(
        stores: Stores,
        client: RegistryClient,
        url: &str,
        opts: PullOptions,
    ) -> Result<Self> {
        let reference = ImageReference::parse(url)?;
        let mut image = Self {
            url: reference.canonical_url(),
            index_key: reference.url_key(),
            reference,
            index: empty_index(),
            manifests: Vec::new(),
            field: None,
            stores,
            client,
            fan_out: match opts.layer_fan_out {
                0 => DEFAULT_LAYER_FAN_OUT,
                n => n,
            },
        };

        image.load_index(opts.force_pull).await?;
        image.filter_platforms(&opts.platforms)?;
        image.hydrate_manifests().await?;
        for i in 0..image.manifests.len() {
            image.hydrate_manifest_blobs(i).await?;
        }
        Ok(image)
    }

    /// Load an image purely from the cache, without touching the network.
    ///
    /// `reference` is parsed like a pull reference; when no index exists
    /// under its URL key, the input is also tried as a literal index key so
    /// images can be addressed by the key `image ls -q` prints.
    pub fn local(
        stores: Stores,
        client: RegistryClient,
        reference: &str,
        platforms: &[String],
    ) -> Result<Self> {
        let parsed = ImageReference::parse(reference)?;
        let url = parsed.canonical_url();
        let mut index_key = parsed.url_key();

        let bytes = match stores.index.read_all(&index_key) {
            Ok(bytes) => bytes,
            Err(CacheError::NotFound { .. }) => {
                index_key = reference.to_string();
                match stores.index.read_all(&index_key) {
                    Ok(bytes) => bytes,
                    Err(CacheError::NotFound { .. }) => return Err(OciError::NotFound(url)),
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let mut image = Self {
            reference: parsed,
            url,
            index_key,
            index: read_index(&bytes)?,
            manifests: Vec::new(),
            field: None,
            stores,
            client,
            fan_out: DEFAULT_LAYER_FAN_OUT,
        };
        image.filter_platforms(platforms)?;

        for desc in image.index.manifests.clone() {
            let hex = desc.digest.sha256_hex()?;
            let bytes = match image.stores.blobs.read_all(hex) {
                Ok(bytes) => bytes,
                Err(CacheError::NotFound { .. }) => {
                    return Err(OciError::NotFound(desc.digest.to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            image.manifests.push(read_manifest(&bytes)?);
        }
        Ok(image)
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    pub fn index(&self) -> &OciIndex {
        &self.index
    }

    pub fn manifests(&self) -> &[OciManifest] {
        &self.manifests
    }

    pub fn field(&self) -> Option<&Field> {
        self.field.as_ref()
    }

    /// Build the 2DFS field described by `manifest`, attach it as a layer
    /// to every manifest, and rewrite the image under `target`.
    pub fn add_field(&mut self, manifest: &TwoDfsManifest, target: &str) -> Result<()> {
        let field = self.build_field(manifest)?;
        let field_bytes = field.marshal();
        let field_digest = tdfs_codec::sha256_hex_of(&field_bytes);
        self.store_blob_checked(&field_digest, &field_bytes)?;
        self.field = Some(field);

        let new_reference = ImageReference::parse(target)?;
        let new_url = new_reference.canonical_url();
        let new_key = new_reference.url_key();
        let image_url = format!(
            "https://{}/{}",
            new_reference.registry, new_reference.repository
        );

        for (i, manifest) in self.manifests.iter_mut().enumerate() {
            manifest.layers.push(OciDescriptor::new(
                media_type::TWODFS_FIELD,
                Digest::from_sha256_hex(&field_digest),
                field_bytes.len() as u64,
            ));
            if let Some(annotations) = manifest.annotations.as_mut() {
                annotations.insert(ANNOTATION_IMAGE_URL.to_string(), image_url.clone());
                annotations.insert(
                    ANNOTATION_IMAGE_VERSION.to_string(),
                    new_reference.reference.clone(),
                );
            }
            if let Some(annotations) = self.index.manifests[i].annotations.as_mut() {
                annotations.insert(ANNOTATION_IMAGE_URL.to_string(), image_url.clone());
                annotations.insert(
                    ANNOTATION_IMAGE_VERSION.to_string(),
                    new_reference.reference.clone(),
                );
            }
        }

        // Stage every rewritten manifest blob, then reissue the digests in
        // the index in one pass. The rewritten manifests are new objects;
        // their original descriptor digests are intentionally left behind.
        for (i, manifest) in self.manifests.iter().enumerate() {
            let bytes = serde_json::to_vec(manifest)?;
            let hex = tdfs_codec::sha256_hex_of(&bytes);
            self.store_blob_checked(&hex, &bytes)?;
            self.index.manifests[i].digest = Digest::from_sha256_hex(&hex);
            self.index.manifests[i].size = bytes.len() as u64;
        }

        self.index
            .annotations
            .get_or_insert_with(HashMap::new)
            .insert(IMAGE_NAME_ANNOTATION.to_string(), new_url.clone());

        // The new URL key must be durable before the old one goes away.
        let index_bytes = serde_json::to_vec(&self.index)?;
        self.stores.index.put(&new_key, &index_bytes)?;
        if new_key != self.index_key {
            self.stores.index.del(&self.index_key)?;
        }

        self.reference = new_reference;
        self.url = new_url;
        self.index_key = new_key;
        tracing::info!(url = %self.url, "2dfs field attached");
        Ok(())
    }

    async fn load_index(&mut self, force_pull: bool) -> Result<()> {
        if !force_pull {
            if let Ok(bytes) = self.stores.index.read_all(&self.index_key) {
                match read_index(&bytes) {
                    Ok(index) => {
                        tracing::info!(url = %self.url, "index loaded from cache");
                        self.index = index;
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(url = %self.url, error = %e, "evicting unreadable cached index");
                        self.stores.index.del(&self.index_key)?;
                    }
                }
            }
        }

        tracing::info!(url = %self.url, "downloading index");
        let mut index = self.client.download_index(&self.reference).await?;
        index
            .annotations
            .get_or_insert_with(HashMap::new)
            .insert(IMAGE_NAME_ANNOTATION.to_string(), self.url.clone());
        self.stores
            .index
            .put(&self.index_key, &serde_json::to_vec(&index)?)?;
        self.index = index;
        Ok(())
    }

    fn filter_platforms(&mut self, platforms: &[String]) -> Result<()> {
        if platforms.is_empty() {
            return Ok(());
        }
        self.index.manifests.retain(|desc| {
            desc.platform
                .as_ref()
                .is_some_and(|p| platforms.iter().any(|want| *want == p.to_string()))
        });
        if self.index.manifests.is_empty() {
            return Err(OciError::NotFound(format!(
                "no manifest of {} matches platforms {platforms:?}",
                self.url
            )));
        }
        Ok(())
    }

    async fn hydrate_manifests(&mut self) -> Result<()> {
        for desc in self.index.manifests.clone() {
            let hex = desc.digest.sha256_hex()?.to_string();
            if self.stores.blobs.check(&hex) {
                tracing::debug!(digest = %hex, "manifest cached");
            } else {
                tracing::info!(digest = %hex, "downloading manifest");
                let response = self
                    .client
                    .download_manifest(&self.reference, &desc.digest)
                    .await?;
                write_stream_checked(&self.stores, &hex, response).await?;
            }
            let bytes = self.stores.blobs.read_all(&hex)?;
            self.manifests.push(read_manifest(&bytes)?);
        }
        Ok(())
    }

    async fn hydrate_manifest_blobs(&self, manifest_idx: usize) -> Result<()> {
        let manifest = &self.manifests[manifest_idx];

        let config_hex = manifest.config.digest.sha256_hex()?;
        if self.stores.blobs.check(config_hex) {
            tracing::debug!(digest = %config_hex, "config cached");
        } else {
            tracing::info!(digest = %config_hex, "downloading config");
            let response = self
                .client
                .download_blob(
                    &self.reference,
                    &manifest.config.digest,
                    &manifest.config.media_type,
                )
                .await?;
            write_stream_checked(&self.stores, config_hex, response).await?;
        }

        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let fetches = manifest.layers.iter().map(|layer| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let hex = layer.digest.sha256_hex()?;
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("layer semaphore is never closed");
                if self.stores.blobs.check(hex) {
                    tracing::debug!(digest = %hex, "layer cached");
                    return Ok(());
                }
                tracing::info!(digest = %hex, "downloading layer");
                let response = self
                    .client
                    .download_blob(&self.reference, &layer.digest, &layer.media_type)
                    .await?;
                write_stream_checked(&self.stores, hex, response).await
            }
        });
        futures::future::try_join_all(fetches).await?;
        Ok(())
    }

    fn build_field(&self, manifest: &TwoDfsManifest) -> Result<Field> {
        let scratch = tempfile::tempdir()?;
        let mut field = Field::new();

        for request in &manifest.allotments {
            let dst = request.dst.trim_start_matches('/');
            if dst.is_empty() {
                return Err(FieldError::MalformedManifest(format!(
                    "allotment ({},{}) has an empty dst",
                    request.row, request.col
                ))
                .into());
            }

            // Allotment sources are small by design, buffering is fine.
            let src_bytes = fs::read(&request.src)?;
            let src_key = tdfs_codec::sha256_hex_of(&src_bytes);

            let (digest, diff_id) = match self.cached_compression(&src_key, dst)? {
                Some(hit) => {
                    tracing::debug!(
                        row = request.row,
                        col = request.col,
                        digest = %hit.0,
                        "allotment reused from cache"
                    );
                    hit
                }
                None => self.compress_allotment(scratch.path(), request, dst, &src_bytes, &src_key)?,
            };

            field.add_allotment(Allotment {
                row: request.row,
                col: request.col,
                digest,
                file_name: dst.to_string(),
                cache_key: diff_id,
            });
        }
        Ok(field)
    }

    /// Look up a previous compression of the same source file at the same
    /// destination path.
    fn cached_compression(&self, src_key: &str, dst: &str) -> Result<Option<(String, String)>> {
        let bytes = match self.stores.uncompressed_keys.read_all(src_key) {
            Ok(bytes) => bytes,
            Err(CacheError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = CacheKeys::parse(&bytes)?;
        for key in record.keys {
            if key.file_name == dst && self.stores.blobs.check(&key.digest) {
                return Ok(Some((key.digest, key.diff_id)));
            }
        }
        Ok(None)
    }

    fn compress_allotment(
        &self,
        scratch: &Path,
        request: &AllotmentRequest,
        dst: &str,
        src_bytes: &[u8],
        src_key: &str,
    ) -> Result<(String, String)> {
        let layer_dir = scratch.join(format!("r{}-c{}", request.row, request.col));
        if layer_dir.exists() {
            fs::remove_dir_all(&layer_dir)?;
        }
        let file_path = layer_dir.join(dst);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file_path, src_bytes)?;

        let mut tar_bytes = Vec::new();
        tdfs_codec::archive_folder(&layer_dir, &mut tar_bytes)?;
        let diff_id = tdfs_codec::sha256_hex_of(&tar_bytes);

        let archive = tdfs_codec::compress_folder(&layer_dir)?;
        let digest = match tdfs_codec::sha256_hex(BufReader::new(File::open(&archive)?))? {
            Some(digest) => digest,
            None => {
                return Err(OciError::Io(std::io::Error::other(
                    "allotment archive came out empty",
                )))
            }
        };

        if !self.stores.blobs.check(&digest) {
            let mut writer = self.stores.blobs.add(&digest)?;
            let mut reader = BufReader::new(File::open(&archive)?);
            std::io::copy(&mut reader, &mut writer)?;
            writer.commit()?;
            if !self.stores.blobs.check(&digest) {
                let _ = fs::remove_file(&archive);
                return Err(OciError::IntegrityFailure { digest });
            }
            tracing::info!(
                row = request.row,
                col = request.col,
                digest = %digest,
                "allotment created"
            );
        }
        let _ = fs::remove_file(&archive);

        let mut record = match self.stores.uncompressed_keys.read_all(src_key) {
            Ok(bytes) => CacheKeys::parse(&bytes).unwrap_or_default(),
            Err(_) => CacheKeys::default(),
        };
        record.keys.retain(|key| key.file_name != dst);
        record.keys.push(FileCacheKey {
            diff_id: diff_id.clone(),
            digest: digest.clone(),
            file_name: dst.to_string(),
        });
        self.stores
            .uncompressed_keys
            .put(src_key, &record.marshal()?)?;

        Ok((digest, diff_id))
    }

    /// Store a self-produced blob and run it through the integrity gate.
    fn store_blob_checked(&self, hex: &str, bytes: &[u8]) -> Result<()> {
        if self.stores.blobs.check(hex) {
            return Ok(());
        }
        self.stores.blobs.put(hex, bytes)?;
        if !self.stores.blobs.check(hex) {
            return Err(OciError::IntegrityFailure {
                digest: hex.to_string(),
            });
        }
        Ok(())
    }
}

fn empty_index() -> OciIndex {
    OciIndex {
        schema_version: 2,
        media_type: Some(media_type::IMAGE_INDEX.to_string()),
        manifests: Vec::new(),
        annotations: None,
    }
}

/// Stream a download into the blob store and gate it on the digest check.
async fn write_stream_checked(
    stores: &Stores,
    hex: &str,
    mut response: reqwest::Response,
) -> Result<()> {
    let mut writer = stores.blobs.add(hex)?;
    while let Some(chunk) = response.chunk().await? {
        writer.write_all(&chunk)?;
    }
    writer.commit()?;
    if !stores.blobs.check(hex) {
        return Err(OciError::IntegrityFailure {
            digest: hex.to_string(),
        });
    }
    Ok(())
}
