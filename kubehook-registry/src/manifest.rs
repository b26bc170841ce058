//! Manifest and image config documents

use serde::Deserialize;

/// Accept header covering single-platform manifests and multi-platform indexes
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Accept header for image config blobs
pub const CONFIG_ACCEPT: &str =
    "application/vnd.oci.image.config.v1+json, application/vnd.docker.container.image.v1+json";

const PREFERRED_OS: &str = "linux";
const PREFERRED_ARCHITECTURE: &str = "amd64";

/// Either an image manifest or an index of per-platform manifests
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub media_type: Option<String>,

    /// Present on indexes
    #[serde(default)]
    pub manifests: Vec<IndexEntry>,

    /// Present on image manifests
    #[serde(default)]
    pub config: Option<Descriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexEntry {
    pub digest: String,

    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    pub digest: String,
}

impl Manifest {
    /// Whether this document lists per-platform manifests
    pub fn is_index(&self) -> bool {
        !self.manifests.is_empty()
    }

    /// Digest of the linux/amd64 manifest, or of the first entry
    pub fn select_platform(&self) -> Option<&str> {
        self.manifests
            .iter()
            .find(|entry| {
                entry.platform.as_ref().is_some_and(|p| {
                    p.os == PREFERRED_OS && p.architecture == PREFERRED_ARCHITECTURE
                })
            })
            .or_else(|| self.manifests.first())
            .map(|entry| entry.digest.as_str())
    }
}

/// The parts of an image config blob that matter here
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub config: Option<ContainerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerConfig {
    #[serde(default, rename = "Entrypoint")]
    pub entrypoint: Option<Vec<String>>,
}

impl ImageConfig {
    /// Entrypoint joined by spaces, `None` if the image declares none
    pub fn entrypoint(&self) -> Option<String> {
        self.config
            .as_ref()
            .and_then(|c| c.entrypoint.as_ref())
            .filter(|e| !e.is_empty())
            .map(|e| e.join(" "))
    }
}
