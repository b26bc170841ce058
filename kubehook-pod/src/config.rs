//! Hook configuration
//!
//! Every environment-derived setting the pod lifecycle needs is read once
//! into [`HookConfig`] and passed explicitly to the spec builder and the
//! lifecycle client.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Namespace file mounted into every pod with a service account token
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// How long to wait for a pod to become ready when nothing is configured
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_RUNNER_POD_NAME: &str = "local-pod";

/// Hook configuration
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Namespace holding the runner pod and everything the hook creates
    pub namespace: String,

    /// Name of the runner pod; prefix for generated names and the value of
    /// the `runner-pod` label
    pub runner_pod_name: String,

    /// Persistent volume claim shared between runner and job pods
    pub claim_name: String,

    /// Leave the image pull policy unset instead of `IfNotPresent`
    pub disable_image_pull: bool,

    /// Pin pods with node affinity instead of assigning `nodeName` directly
    pub use_kube_scheduler: bool,

    /// Deadline for a created pod to reach `Running`
    pub readiness_timeout: Duration,

    /// Workspace path as seen by the runner (`GITHUB_WORKSPACE`)
    pub github_workspace: Option<String>,

    /// Runner workspace root (`RUNNER_WORKSPACE`), used to locate externals
    pub runner_workspace: Option<PathBuf>,

    /// Runner temp directory; step scripts are staged here
    pub runner_temp: PathBuf,

    /// Optional pod extension template
    pub extension_path: Option<PathBuf>,

    /// Entrypoint used for container steps whose image declares none
    pub container_step_entrypoint: Option<String>,

    /// Inspect images in their registry to find a missing entrypoint
    pub inspect_image: bool,
}

impl HookConfig {
    /// Creates configuration from environment variables
    ///
    /// Recognised environment variables:
    /// - ACTIONS_RUNNER_KUBERNETES_NAMESPACE (falls back to the service account namespace, then `default`)
    /// - ACTIONS_RUNNER_POD_NAME (default: `local-pod`)
    /// - ACTIONS_RUNNER_CLAIM_NAME (default: `<runner pod>-work`)
    /// - ENV_DISABLE_IMAGE_PULL (`true` to disable)
    /// - ENV_USE_KUBE_SCHEDULER (`true` to enable)
    /// - ACTIONS_RUNNER_PREPARE_JOB_TIMEOUT_SECONDS (default: 600)
    /// - GITHUB_WORKSPACE, RUNNER_WORKSPACE, RUNNER_TEMP
    /// - ACTIONS_RUNNER_CONTAINER_HOOK_TEMPLATE
    /// - ENV_HOOK_CONTAINER_STEP_ENTRYPOINT
    /// - ENV_HOOK_INSPECT_IMAGE (`1` to enable)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let namespace = resolve_namespace(
            var("ACTIONS_RUNNER_KUBERNETES_NAMESPACE"),
            Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE),
        );

        let runner_pod_name =
            var("ACTIONS_RUNNER_POD_NAME").unwrap_or_else(|| DEFAULT_RUNNER_POD_NAME.to_string());

        let claim_name =
            var("ACTIONS_RUNNER_CLAIM_NAME").unwrap_or_else(|| format!("{}-work", runner_pod_name));

        let readiness_timeout =
            parse_readiness_timeout(var("ACTIONS_RUNNER_PREPARE_JOB_TIMEOUT_SECONDS").as_deref());

        Self {
            namespace,
            runner_pod_name,
            claim_name,
            disable_image_pull: var("ENV_DISABLE_IMAGE_PULL").as_deref() == Some("true"),
            use_kube_scheduler: var("ENV_USE_KUBE_SCHEDULER").as_deref() == Some("true"),
            readiness_timeout,
            github_workspace: var("GITHUB_WORKSPACE"),
            runner_workspace: var("RUNNER_WORKSPACE").map(PathBuf::from),
            runner_temp: var("RUNNER_TEMP")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            extension_path: var("ACTIONS_RUNNER_CONTAINER_HOOK_TEMPLATE").map(PathBuf::from),
            container_step_entrypoint: var("ENV_HOOK_CONTAINER_STEP_ENTRYPOINT"),
            inspect_image: var("ENV_HOOK_INSPECT_IMAGE").as_deref() == Some("1"),
        }
    }

    /// Label selector matching every object the hook created for this runner
    pub fn runner_selector(&self) -> String {
        format!("{}={}", crate::RUNNER_POD_LABEL, self.runner_pod_name)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.is_empty() {
            return Err("namespace cannot be empty".to_string());
        }

        if self.runner_pod_name.is_empty() {
            return Err("runner pod name cannot be empty".to_string());
        }

        if self.claim_name.is_empty() {
            return Err("volume claim name cannot be empty".to_string());
        }

        if self.readiness_timeout.is_zero() {
            return Err("readiness timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            runner_pod_name: DEFAULT_RUNNER_POD_NAME.to_string(),
            claim_name: format!("{}-work", DEFAULT_RUNNER_POD_NAME),
            disable_image_pull: false,
            use_kube_scheduler: false,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            github_workspace: None,
            runner_workspace: None,
            runner_temp: std::env::temp_dir(),
            extension_path: None,
            container_step_entrypoint: None,
            inspect_image: false,
        }
    }
}

fn resolve_namespace(explicit: Option<String>, namespace_file: &Path) -> String {
    if let Some(namespace) = explicit {
        return namespace;
    }

    match std::fs::read_to_string(namespace_file) {
        Ok(contents) if !contents.trim().is_empty() => contents.trim().to_string(),
        Ok(_) => {
            warn!(
                "Service account namespace file {} is empty, defaulting to '{}'",
                namespace_file.display(),
                DEFAULT_NAMESPACE
            );
            DEFAULT_NAMESPACE.to_string()
        }
        Err(e) => {
            warn!(
                "Failed to read namespace from ACTIONS_RUNNER_KUBERNETES_NAMESPACE or service account, defaulting to '{}': {}",
                DEFAULT_NAMESPACE, e
            );
            DEFAULT_NAMESPACE.to_string()
        }
    }
}

fn parse_readiness_timeout(value: Option<&str>) -> Duration {
    match value {
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => {
                debug!("Using readiness timeout of {} seconds", secs);
                Duration::from_secs(secs)
            }
            _ => {
                info!(
                    "Invalid timeout value '{}', using default of {} seconds",
                    raw,
                    DEFAULT_READINESS_TIMEOUT.as_secs()
                );
                DEFAULT_READINESS_TIMEOUT
            }
        },
        None => {
            info!(
                "Using default timeout of {} seconds for preparing job pod",
                DEFAULT_READINESS_TIMEOUT.as_secs()
            );
            DEFAULT_READINESS_TIMEOUT
        }
    }
}
