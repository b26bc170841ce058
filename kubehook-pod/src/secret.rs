//! Image pull secrets
//!
//! A private registry in the container definition becomes an immutable
//! `kubernetes.io/dockerconfigjson` secret, created before the pod and
//! referenced from its `imagePullSecrets`. Secrets carry the runner label so
//! cleanup can prune them with the pods.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubehook_core::RegistryAuth;
use serde_json::json;
use std::collections::BTreeMap;

use crate::config::HookConfig;
use crate::spec::{RUNNER_POD_LABEL, random_suffix};

/// Registry assumed when the credentials name none
pub const DEFAULT_REGISTRY_SERVER: &str = "ghcr.io";

const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Name for a new pull secret of this runner
pub fn pull_secret_name(config: &HookConfig) -> String {
    format!("{}-pull-secret-{}", config.runner_pod_name, random_suffix())
}

/// Builds the pull secret manifest for `auth`
///
/// # Arguments
/// * `config` - Hook configuration, for naming and labels
/// * `name` - Secret name, usually from [`pull_secret_name`]
/// * `auth` - Registry credentials from the container definition
pub fn build_pull_secret(config: &HookConfig, name: &str, auth: &RegistryAuth) -> Secret {
    let server = auth.server_url().unwrap_or(DEFAULT_REGISTRY_SERVER);
    let docker_config = json!({
        "auths": {
            server: {
                "username": auth.username().unwrap_or_default(),
                "password": auth.password(),
            }
        }
    });

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                RUNNER_POD_LABEL.to_string(),
                config.runner_pod_name.clone(),
            )])),
            ..Default::default()
        },
        immutable: Some(true),
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        string_data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            docker_config.to_string(),
        )])),
        ..Default::default()
    }
}
