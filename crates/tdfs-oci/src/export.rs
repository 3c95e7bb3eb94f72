//! OCI image-layout export and the registry upload sequence.

use crate::image::ContainerImage;
use crate::spec::{media_type, OCI_LAYOUT_CONTENT};
use crate::Result;
use std::fs::{self, File};
use std::path::Path;
use tdfs_field::Field;

impl ContainerImage {
    /// Materialize the image as an OCI image-layout `tar.gz` at `dst`.
    ///
    /// The archive holds `index.json`, the `oci-layout` marker and every
    /// blob reachable from the index under `blobs/sha256/`, including the
    /// allotment blobs when a 2DFS layer is present.
    pub fn export_as_tar(&mut self, dst: &Path) -> Result<()> {
        let staging = tempfile::tempdir()?;
        fs::write(
            staging.path().join("index.json"),
            serde_json::to_vec(&self.index)?,
        )?;
        fs::write(staging.path().join("oci-layout"), OCI_LAYOUT_CONTENT)?;
        let blob_dir = staging.path().join("blobs").join("sha256");
        fs::create_dir_all(&blob_dir)?;

        for (i, desc) in self.index.manifests.iter().enumerate() {
            self.export_blob(&blob_dir, desc.digest.sha256_hex()?)?;

            let manifest = &self.manifests[i];
            self.export_blob(&blob_dir, manifest.config.digest.sha256_hex()?)?;
            for layer in &manifest.layers {
                self.export_blob(&blob_dir, layer.digest.sha256_hex()?)?;
            }
        }

        self.recover_field()?;
        if let Some(field) = &self.field {
            for allotment in field.iter_allotments() {
                self.export_blob(&blob_dir, &allotment.digest)?;
            }
        }

        let archive = tdfs_codec::compress_folder(staging.path())?;
        move_file(&archive, dst)?;
        tracing::info!(url = %self.url, dst = %dst.display(), "image exported");
        Ok(())
    }

    /// Push every cached artifact of this image to its registry.
    ///
    /// Per manifest: layers, config, then the manifest itself by digest;
    /// allotment blobs follow when a field is present; the index goes last
    /// under the partition tag. A single bearer token is threaded through
    /// the whole sequence.
    pub async fn upload(&mut self) -> Result<()> {
        self.recover_field()?;
        let mut token: Option<String> = None;

        for (i, desc) in self.index.manifests.iter().enumerate() {
            let manifest = &self.manifests[i];
            for layer in &manifest.layers {
                self.upload_blob_from_cache(layer.digest.sha256_hex()?, layer.size, &mut token)
                    .await?;
            }
            self.upload_blob_from_cache(
                manifest.config.digest.sha256_hex()?,
                manifest.config.size,
                &mut token,
            )
            .await?;

            let manifest_hex = desc.digest.sha256_hex()?;
            let bytes = self.stores.blobs.read_all(manifest_hex)?;
            let manifest_media_type = manifest
                .media_type
                .clone()
                .unwrap_or_else(|| media_type::IMAGE_MANIFEST.to_string());
            self.client
                .upload_manifest(
                    &self.reference,
                    &bytes,
                    &manifest_media_type,
                    &format!("sha256:{manifest_hex}"),
                    &mut token,
                )
                .await?;
        }

        if let Some(field) = &self.field {
            for allotment in field.iter_allotments() {
                let size = self.stores.blobs.size(&allotment.digest)?;
                self.upload_blob_from_cache(&allotment.digest, size, &mut token)
                    .await?;
            }
        }

        let index_bytes = serde_json::to_vec(&self.index)?;
        let partition_tag = self.reference.reference.clone();
        self.client
            .upload_manifest(
                &self.reference,
                &index_bytes,
                media_type::IMAGE_INDEX,
                &partition_tag,
                &mut token,
            )
            .await?;

        tracing::info!(url = %self.url, "image pushed");
        Ok(())
    }

    /// When no field is attached in memory but a manifest carries a 2DFS
    /// layer, read the field back from its layer blob.
    fn recover_field(&mut self) -> Result<()> {
        if self.field.is_some() {
            return Ok(());
        }
        let layer_hex = self.manifests.iter().find_map(|manifest| {
            manifest
                .layers
                .iter()
                .find(|layer| layer.media_type == media_type::TWODFS_FIELD)
                .map(|layer| layer.digest.encoded().to_string())
        });
        if let Some(hex) = layer_hex {
            let bytes = self.stores.blobs.read_all(&hex)?;
            self.field = Some(Field::unmarshal(&bytes)?);
        }
        Ok(())
    }

    fn export_blob(&self, blob_dir: &Path, hex: &str) -> Result<()> {
        let target = blob_dir.join(hex);
        if target.exists() {
            return Ok(());
        }
        let mut reader = self.stores.blobs.get(hex)?;
        let mut file = File::create(&target)?;
        std::io::copy(&mut reader, &mut file)?;
        tracing::debug!(digest = %hex, "blob exported");
        Ok(())
    }

    async fn upload_blob_from_cache(
        &self,
        hex: &str,
        size: u64,
        token: &mut Option<String>,
    ) -> Result<()> {
        let reader = self.stores.blobs.get(hex)?;
        self.client
            .upload_blob(&self.reference, hex, reader, size, token)
            .await
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}
