//! Cache garbage collection.
//!
//! Indexes are the GC roots and are never collected. A full walk of every
//! cached index counts references to manifest, config, layer and allotment
//! blobs; 2DFS layers are unmarshalled so allotment digests and their
//! recorded diff-IDs participate. Blobs that end the walk at zero
//! references are deleted, and `uncompressed-keys` records are rewritten to
//! keep only diff-IDs still reachable from some field.

use crate::keys::CacheKeys;
use crate::spec::{media_type, read_index, read_manifest};
use crate::Result;
use std::collections::HashMap;
use tdfs_cache::Stores;
use tdfs_field::Field;

/// Keys removed by a prune pass, in removal order.
#[derive(Debug, Default)]
pub struct PruneReport {
    pub removed: Vec<String>,
}

/// Remove every cache entry not reachable from any index.
pub fn prune(stores: &Stores) -> Result<PruneReport> {
    let mut blob_refs: HashMap<String, u64> = stores
        .blobs
        .list()?
        .into_iter()
        .map(|key| (key, 0))
        .collect();

    let mut diff_refs: HashMap<String, u64> = HashMap::new();
    for key in stores.uncompressed_keys.list()? {
        let record = CacheKeys::parse(&stores.uncompressed_keys.read_all(&key)?)?;
        for entry in record.keys {
            diff_refs.entry(entry.diff_id).or_insert(0);
        }
    }

    for index_key in stores.index.list()? {
        let index = read_index(&stores.index.read_all(&index_key)?)?;
        for desc in &index.manifests {
            let manifest_hex = desc.digest.encoded().to_string();
            *blob_refs.entry(manifest_hex.clone()).or_insert(0) += 1;

            let manifest = read_manifest(&stores.blobs.read_all(&manifest_hex)?)?;
            for layer in &manifest.layers {
                let layer_hex = layer.digest.encoded().to_string();
                *blob_refs.entry(layer_hex.clone()).or_insert(0) += 1;

                if layer.media_type == media_type::TWODFS_FIELD {
                    let field = Field::unmarshal(&stores.blobs.read_all(&layer_hex)?)?;
                    for allotment in field.iter_allotments() {
                        *blob_refs.entry(allotment.digest.clone()).or_insert(0) += 1;
                        if !allotment.cache_key.is_empty() {
                            *diff_refs.entry(allotment.cache_key.clone()).or_insert(0) += 1;
                        }
                    }
                }
            }
            *blob_refs
                .entry(manifest.config.digest.encoded().to_string())
                .or_insert(0) += 1;
        }
    }

    let mut report = PruneReport::default();
    for (blob, refs) in &blob_refs {
        if *refs == 0 {
            stores.blobs.del(blob)?;
            tracing::debug!(digest = %blob, "unreferenced blob removed");
            report.removed.push(blob.clone());
        }
    }

    for key in stores.uncompressed_keys.list()? {
        let record = CacheKeys::parse(&stores.uncompressed_keys.read_all(&key)?)?;
        let total = record.keys.len();
        let retained: Vec<_> = record
            .keys
            .into_iter()
            .filter(|entry| diff_refs.get(&entry.diff_id).copied().unwrap_or(0) != 0)
            .collect();
        if retained.len() == total {
            continue;
        }

        stores.uncompressed_keys.del(&key)?;
        report.removed.push(key.clone());
        if !retained.is_empty() {
            let record = CacheKeys { keys: retained };
            stores.uncompressed_keys.put(&key, &record.marshal()?)?;
        }
    }

    tracing::info!(removed = report.removed.len(), "prune finished");
    Ok(report)
}
