//! OCI image handling for the 2DFS builder.
//!
//! This crate speaks the subset of the OCI distribution protocol the
//! builder needs (index/manifest/blob pull, bearer challenge/response auth,
//! monolithic blob push), assembles images by hydrating them into the local
//! content-addressed cache, attaches 2DFS field layers, exports OCI image
//! layouts, and garbage-collects unreferenced cache entries.

mod client;
mod error;
mod export;
mod image;
mod keys;
mod prune;
mod reference;
mod spec;

pub use client::RegistryClient;
pub use error::{OciError, Result};
pub use image::{ContainerImage, PullOptions};
pub use keys::{CacheKeys, FileCacheKey};
pub use prune::{prune, PruneReport};
pub use reference::ImageReference;
pub use spec::{
    media_type, read_index, read_manifest, Digest, OciDescriptor, OciIndex, OciManifest,
    OciPlatform, ANNOTATION_IMAGE_URL, ANNOTATION_IMAGE_VERSION, IMAGE_NAME_ANNOTATION,
    OCI_LAYOUT_CONTENT,
};
