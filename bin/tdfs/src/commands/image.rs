//! `tdfs image`: list, remove, prune, export and push cached images.

use super::open_stores;
use crate::output;
use anyhow::bail;
use std::path::Path;
use std::time::Instant;
use tdfs_cache::Stores;
use tdfs_oci::{
    media_type, read_index, read_manifest, ContainerImage, ImageReference, RegistryClient,
    ANNOTATION_IMAGE_VERSION, IMAGE_NAME_ANNOTATION,
};

pub fn ls(quiet: bool) -> anyhow::Result<()> {
    let (_, stores) = open_stores()?;
    let keys = stores.index.list()?;

    if quiet {
        for key in keys {
            println!("{key}");
        }
        return Ok(());
    }

    let mut table = output::new_table(&["#", "URL", "TAG", "TYPE", "REFERENCE"]);
    for (i, key) in keys.iter().enumerate() {
        let index = read_index(&stores.index.read_all(key)?)?;
        let url = index
            .annotations
            .as_ref()
            .and_then(|a| a.get(IMAGE_NAME_ANNOTATION))
            .cloned()
            .unwrap_or_default();

        let Some(first) = index.manifests.first() else {
            continue;
        };
        let tag = first
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_IMAGE_VERSION))
            .cloned()
            .unwrap_or_else(|| {
                url.rsplit_once(':')
                    .map(|(_, tag)| tag.to_string())
                    .unwrap_or_default()
            });

        let manifest = read_manifest(&stores.blobs.read_all(first.digest.encoded())?)?;
        let image_type = if manifest
            .layers
            .iter()
            .any(|layer| layer.media_type == media_type::TWODFS_FIELD)
        {
            "OCI+2DFS"
        } else {
            "OCI"
        };

        table.add_row([
            i.to_string(),
            url,
            tag,
            image_type.to_string(),
            key.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn rm(all: bool, refs: &[String]) -> anyhow::Result<()> {
    let (paths, stores) = open_stores()?;

    if all {
        paths.remove_all()?;
        return Ok(());
    }

    for reference in refs {
        // Accept the raw index key, its digest, and the parsed reference.
        stores.index.del(reference)?;
        stores
            .index
            .del(&tdfs_codec::sha256_hex_of(reference.as_bytes()))?;
        if let Ok(parsed) = ImageReference::parse(reference) {
            stores.index.del(&parsed.url_key())?;
        }
    }
    run_prune(&stores)
}

pub fn prune() -> anyhow::Result<()> {
    let (_, stores) = open_stores()?;
    run_prune(&stores)
}

fn run_prune(stores: &Stores) -> anyhow::Result<()> {
    let report = tdfs_oci::prune(stores)?;
    for key in &report.removed {
        println!("{key} [REMOVED]");
    }
    println!("Removed {} entries", report.removed.len());
    Ok(())
}

pub fn export(reference: &str, target_file: &Path, platform: Option<&str>) -> anyhow::Result<()> {
    let platforms = parse_platform(platform)?;
    let start = Instant::now();

    let (_, stores) = open_stores()?;
    tracing::info!(reference = %reference, "retrieving image from local cache");
    let mut image = ContainerImage::local(stores, RegistryClient::new(), reference, &platforms)?;

    tracing::info!(target = %target_file.display(), "exporting image");
    image.export_as_tar(target_file)?;

    println!("Done ✅ ({:.3}s)", start.elapsed().as_secs_f64());
    Ok(())
}

pub async fn push(reference: &str, platform: Option<&str>) -> anyhow::Result<()> {
    let platforms = parse_platform(platform)?;
    let start = Instant::now();

    let (_, stores) = open_stores()?;
    tracing::info!(reference = %reference, "retrieving image from local cache");
    let mut image = ContainerImage::local(stores, RegistryClient::new(), reference, &platforms)?;

    tracing::info!(reference = %reference, "pushing image");
    image.upload().await?;

    println!("Done ✅ ({:.3}s)", start.elapsed().as_secs_f64());
    Ok(())
}

fn parse_platform(platform: Option<&str>) -> anyhow::Result<Vec<String>> {
    let Some(platform) = platform else {
        return Ok(Vec::new());
    };
    if platform.split('/').count() != 2 {
        bail!("invalid platform format: {platform} (expected os/arch)");
    }
    Ok(vec![platform.to_string()])
}
