//! `tdfs build`: pull a base image, attach the 2DFS field described by the
//! manifest file, and optionally export the result.

use super::open_stores;
use anyhow::bail;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tdfs_field::TwoDfsManifest;
use tdfs_oci::{ContainerImage, PullOptions, RegistryClient};

pub async fn run(
    base: &str,
    target: &str,
    manifest_file: &Path,
    force_pull: bool,
    export_as: Option<&str>,
) -> anyhow::Result<()> {
    let start = Instant::now();

    tracing::info!(file = %manifest_file.display(), "parsing manifest file");
    let manifest = TwoDfsManifest::parse(&fs::read(manifest_file)?)?;

    let (_, stores) = open_stores()?;
    tracing::info!(base = %base, "getting image");
    let mut image = ContainerImage::pull(
        stores,
        RegistryClient::new(),
        base,
        PullOptions {
            force_pull,
            ..Default::default()
        },
    )
    .await?;

    tracing::info!(target = %target, "adding field");
    image.add_field(&manifest, target)?;

    if let Some(format) = export_as {
        match format {
            "tar" => image.export_as_tar(Path::new("image.tar.gz"))?,
            other => bail!("unsupported export format: {other}"),
        }
    }

    println!("Done ✅ ({:.3}s)", start.elapsed().as_secs_f64());
    Ok(())
}
