//! Image reference parsing
//!
//! Follows the Docker conventions: a first path component containing a `.`
//! or `:` (or equal to `localhost`) names the registry, anything else lives
//! on Docker Hub, and single-component Hub repositories are official images
//! under `library/`.

use std::fmt;

use crate::error::{RegistryError, Result};

/// Host that serves Docker Hub's registry API
pub const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";

const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", DOCKER_HUB_REGISTRY];
const TRANSPORT_PREFIX: &str = "docker://";
const DEFAULT_TAG: &str = "latest";

/// A parsed `registry/repository[:tag][@digest]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with port if any
    pub registry: String,
    /// Repository path within the registry
    pub repository: String,
    /// Tag or digest to resolve
    pub reference: String,
}

impl ImageReference {
    /// Parses an image reference, with or without a `docker://` prefix
    ///
    /// # Example
    /// ```
    /// use kubehook_registry::ImageReference;
    ///
    /// let image = ImageReference::parse("alpine").unwrap();
    /// assert_eq!(image.registry, "registry-1.docker.io");
    /// assert_eq!(image.repository, "library/alpine");
    /// assert_eq!(image.reference, "latest");
    /// ```
    pub fn parse(image: &str) -> Result<Self> {
        let trimmed = image.trim();
        let name = trimmed.strip_prefix(TRANSPORT_PREFIX).unwrap_or(trimmed);
        if name.is_empty() || name.contains("://") {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let (name, digest) = match name.split_once('@') {
            Some((name, digest)) if !digest.is_empty() => (name, Some(digest)),
            Some(_) => return Err(RegistryError::InvalidReference(image.to_string())),
            None => (name, None),
        };

        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (first, rest.to_string()),
            _ => (DOCKER_HUB_REGISTRY, name.to_string()),
        };

        let registry = if DOCKER_HUB_ALIASES.contains(&registry) {
            DOCKER_HUB_REGISTRY
        } else {
            registry
        };

        let repository = if registry == DOCKER_HUB_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        if repository.is_empty() || tag.is_some_and(str::is_empty) {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let reference = digest.or(tag).unwrap_or(DEFAULT_TAG).to_string();

        Ok(Self {
            registry: registry.to_string(),
            repository,
            reference,
        })
    }

    /// Base URL of the registry's v2 API
    pub fn api_base(&self) -> String {
        format!("https://{}/v2", self.registry)
    }

    /// URL of the manifest for `reference` (a tag or digest)
    pub fn manifest_url(&self, reference: &str) -> String {
        format!("{}/{}/manifests/{}", self.api_base(), self.repository, reference)
    }

    /// URL of the blob with the given digest
    pub fn blob_url(&self, digest: &str) -> String {
        format!("{}/{}/blobs/{}", self.api_base(), self.repository, digest)
    }

    /// Token scope granting pull access to this repository
    pub fn pull_scope(&self) -> String {
        format!("repository:{}:pull", self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reference.contains(':') {
            write!(f, "{}/{}@{}", self.registry, self.repository, self.reference)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.repository, self.reference)
        }
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}
