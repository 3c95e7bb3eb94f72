//! Image reference parsing.
//!
//! Accepted form is `[registry/]path[:reference]`. The first path component
//! is a registry only when it looks like a host (dotted DNS name, host with
//! port, or `localhost`); otherwise the whole input is a repository on
//! Docker Hub. Single-component repositories get the implicit `library/`
//! namespace, and the reference defaults to `latest`.

use crate::{OciError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static REGISTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(localhost(:[0-9]+)?|[a-zA-Z0-9-]+(\.[a-zA-Z0-9-]+)+(:[0-9]+)?|[a-zA-Z0-9-]+:[0-9]+)$")
        .expect("registry regex is valid")
});

/// The default registry for bare repository names.
pub const DEFAULT_REGISTRY: &str = "docker.io";
/// Host used when pulling from Docker Hub.
pub const DOCKER_PULL_HOST: &str = "index.docker.io";
/// Host used when pushing to Docker Hub.
pub const DOCKER_PUSH_HOST: &str = "registry-1.docker.io";

/// Parsed `(registry, repository, reference)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub reference: String,
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(OciError::InvalidReference("empty reference".to_string()));
        }

        let (registry, rest) = match input.split_once('/') {
            Some((first, rest)) if REGISTRY_RE.is_match(first) => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), input.to_string()),
        };

        let (path, reference) = match rest.rsplit_once(':') {
            Some((path, tag)) if !tag.is_empty() && !tag.contains('/') => {
                (path.to_string(), tag.to_string())
            }
            _ => (rest, "latest".to_string()),
        };

        if path.is_empty() {
            return Err(OciError::InvalidReference(format!(
                "no repository in {input:?}"
            )));
        }

        let repository = if path.contains('/') {
            path
        } else {
            format!("library/{path}")
        };

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    /// Host to pull from; Docker Hub pulls go through `index.docker.io`.
    pub fn pull_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_PULL_HOST
        } else {
            &self.registry
        }
    }

    /// Host to push to; Docker Hub pushes go through `registry-1.docker.io`.
    pub fn push_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_PUSH_HOST
        } else {
            &self.registry
        }
    }

    /// Canonical form used to key cached indexes:
    /// `pull-host/repository:reference`.
    pub fn canonical_url(&self) -> String {
        format!("{}/{}:{}", self.pull_host(), self.repository, self.reference)
    }

    /// `sha256(canonical-url)`: the index-store key of this image.
    pub fn url_key(&self) -> String {
        tdfs_codec::sha256_hex_of(self.canonical_url().as_bytes())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_url())
    }
}
