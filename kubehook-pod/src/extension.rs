//! Pod extension templates
//!
//! Operators can ship a partial pod manifest that is merged into every pod
//! the hook creates. Only these fields are taken from it:
//! - `metadata.labels` and `metadata.annotations` (merged, template wins)
//! - `spec.volumes` (appended)
//! - `spec.serviceAccountName` (replaces, when non-empty)
//! - `env` and `volumeMounts` of a container named `$job` (appended to the
//!   job container, which is always the first container of the pod)
//!
//! `apiVersion` and `kind` are not checked, so a `PodTemplate` or a bare
//! `metadata`/`spec` document works as well as a `Pod`.

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::error::{HookError, Result};

/// Name that addresses the job container inside an extension template
pub const JOB_CONTAINER_SENTINEL: &str = "$job";

/// Why an extension template could not be loaded
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("cannot read template: {0}")]
    Read(#[from] std::io::Error),

    #[error("cannot parse template: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// The parts of an extension template that can be merged
#[derive(Debug, Default, Deserialize)]
pub struct PodExtension {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<PodSpec>,
}

/// Reads the template at `path` and merges it into `pod`
pub fn apply_extension(pod: &mut Pod, path: &Path) -> Result<()> {
    let extension = load_extension(path).map_err(|source| HookError::Extension {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Applying pod extension from {}", path.display());
    merge_extension(pod, extension);
    Ok(())
}

/// Parses an extension template
pub fn load_extension(path: &Path) -> std::result::Result<PodExtension, ExtensionError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Merges an already parsed extension into `pod`
pub fn merge_extension(pod: &mut Pod, extension: PodExtension) {
    merge_map(&mut pod.metadata.labels, extension.metadata.labels);
    merge_map(&mut pod.metadata.annotations, extension.metadata.annotations);

    let Some(extension_spec) = extension.spec else {
        return;
    };
    let spec = pod.spec.get_or_insert_with(Default::default);

    if let Some(volumes) = extension_spec.volumes {
        spec.volumes.get_or_insert_with(Vec::new).extend(volumes);
    }

    if let Some(account) = extension_spec.service_account_name.filter(|a| !a.is_empty()) {
        spec.service_account_name = Some(account);
    }

    let Some(job_container) = spec.containers.first_mut() else {
        return;
    };
    for template in extension_spec.containers {
        if template.name != JOB_CONTAINER_SENTINEL {
            continue;
        }
        if let Some(env) = template.env {
            job_container.env.get_or_insert_with(Vec::new).extend(env);
        }
        if let Some(mounts) = template.volume_mounts {
            job_container
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .extend(mounts);
        }
    }
}

fn merge_map(
    base: &mut Option<BTreeMap<String, String>>,
    extension: Option<BTreeMap<String, String>>,
) {
    if let Some(entries) = extension {
        base.get_or_insert_with(BTreeMap::new).extend(entries);
    }
}
