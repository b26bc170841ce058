//! Pod manifest construction
//!
//! Builds the pod that hosts either the whole job (job pod) or a single
//! container step (step pod). Both run one container named `job` that idles
//! on `tail -f /dev/null` so steps can be exec'd into it, and both share the
//! runner's work volume so the workspace, temp directory and externals are
//! visible inside the pod.

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, LocalObjectReference, NodeAffinity, NodeSelector,
    NodeSelectorRequirement, NodeSelectorTerm, PersistentVolumeClaimVolumeSource, Pod, PodSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kubehook_core::ContainerDefinition;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::HookConfig;
use crate::error::{HookError, Result};
use crate::extension::apply_extension;

/// Name of the container steps are exec'd into; always the first container
pub const JOB_CONTAINER_NAME: &str = "job";

/// Name of the volume backed by the runner's work claim
pub const WORK_VOLUME_NAME: &str = "work";

/// Label carrying the runner pod name on everything the hook creates
pub const RUNNER_POD_LABEL: &str = "runner-pod";

const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
const WORK_DIR_MARKER: &str = "_work/";
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 5;

/// What the pod is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPurpose {
    /// Long-lived pod hosting the job container for all script steps
    Job,
    /// Short-lived pod running a single container step
    Step,
}

/// How the pod is tied to the runner's node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Bind directly to the node, bypassing the scheduler
    NodeName(String),
    /// Let the scheduler place it, with a required affinity to the node
    NodeAffinity(String),
    /// Node unknown; leave placement to the scheduler
    Unpinned,
}

impl Placement {
    /// Picks the placement for the runner's node under the configured mode
    pub fn for_node(config: &HookConfig, node_name: Option<String>) -> Self {
        match node_name.filter(|n| !n.is_empty()) {
            Some(node) if config.use_kube_scheduler => Placement::NodeAffinity(node),
            Some(node) => Placement::NodeName(node),
            None => {
                warn!(
                    "Could not determine the node of runner pod {}, pod placement is left to the scheduler",
                    config.runner_pod_name
                );
                Placement::Unpinned
            }
        }
    }
}

/// Builds pod manifests from runner container definitions
pub struct PodSpecBuilder<'a> {
    config: &'a HookConfig,
}

impl<'a> PodSpecBuilder<'a> {
    pub fn new(config: &'a HookConfig) -> Self {
        Self { config }
    }

    /// Name for a new pod of the given purpose
    pub fn pod_name(&self, purpose: PodPurpose) -> String {
        match purpose {
            PodPurpose::Job => format!("{}-workflow", self.config.runner_pod_name),
            PodPurpose::Step => {
                format!("{}-step-{}", self.config.runner_pod_name, random_suffix())
            }
        }
    }

    /// Rejects container definitions that cannot be expressed as a pod
    pub fn check(&self, container: &ContainerDefinition) -> Result<()> {
        if container.has_create_options() {
            return Err(HookError::Unsupported(format!(
                "container create options are not supported: {}",
                container.create_options.as_ref().map(|o| o.to_string()).unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Builds the pod manifest
    ///
    /// # Arguments
    /// * `container` - Container definition from the runner
    /// * `purpose` - Job pod or step pod
    /// * `placement` - Node binding, resolved by the caller
    ///
    /// # Returns
    /// The pod, with the configured extension template merged in. A pull
    /// secret is attached afterwards with [`attach_pull_secret`].
    pub fn build(
        &self,
        container: &ContainerDefinition,
        purpose: PodPurpose,
        placement: Placement,
    ) -> Result<Pod> {
        self.check(container)?;

        let name = self.pod_name(purpose);
        let mut mounts = match purpose {
            PodPurpose::Step => {
                let workspace = self.config.github_workspace.as_deref().unwrap_or_default();
                let sub_path = workspace_sub_path(workspace).ok_or_else(|| {
                    HookError::Validation(format!(
                        "workspace path '{}' is not inside a {} directory",
                        workspace, WORK_DIR_MARKER
                    ))
                })?;
                vec![
                    work_mount("/github/workspace", Some(sub_path)),
                    work_mount("/github/file_commands", Some("_temp/_runner_file_commands")),
                ]
            }
            PodPurpose::Job => vec![work_mount("/__e", Some("externals"))],
        };
        mounts.extend([
            work_mount("/__w", None),
            work_mount("/github/home", Some("_temp/_github_home")),
            work_mount("/github/workflow", Some("_temp/_github_workflow")),
        ]);

        let mut env = vec![env_var("GITHUB_ACTIONS", "true"), env_var("CI", "true")];
        env.extend(
            container
                .environment_variables
                .iter()
                .map(|(key, value)| env_var(key, value)),
        );

        let job_container = Container {
            name: JOB_CONTAINER_NAME.to_string(),
            image: Some(container.image.clone()),
            command: Some(vec!["tail".to_string()]),
            args: Some(vec!["-f".to_string(), "/dev/null".to_string()]),
            env: Some(env),
            volume_mounts: Some(mounts),
            working_dir: container.working_directory().map(str::to_string),
            image_pull_policy: (!self.config.disable_image_pull).then(|| "IfNotPresent".to_string()),
            ..Default::default()
        };

        let mut spec = PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![job_container],
            volumes: Some(vec![Volume {
                name: WORK_VOLUME_NAME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: self.config.claim_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        match placement {
            Placement::NodeName(node) => spec.node_name = Some(node),
            Placement::NodeAffinity(node) => spec.affinity = Some(hostname_affinity(node)),
            Placement::Unpinned => {}
        }

        let mut pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([(
                    RUNNER_POD_LABEL.to_string(),
                    self.config.runner_pod_name.clone(),
                )])),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        };

        if let Some(path) = &self.config.extension_path {
            apply_extension(&mut pod, path)?;
        }

        debug!("Built {:?} pod spec {}", purpose, name);
        Ok(pod)
    }
}

/// Makes `pod` pull its image with the secret called `secret`
pub fn attach_pull_secret(pod: &mut Pod, secret: String) {
    pod.spec
        .get_or_insert_with(Default::default)
        .image_pull_secrets
        .get_or_insert_with(Vec::new)
        .push(LocalObjectReference { name: secret.into() });
}

/// Part of the workspace path below the runner's `_work/` directory
///
/// `/home/runner/_work/repo/repo` maps to `repo/repo`.
pub fn workspace_sub_path(workspace: &str) -> Option<&str> {
    workspace
        .rfind(WORK_DIR_MARKER)
        .map(|idx| &workspace[idx + WORK_DIR_MARKER.len()..])
}

/// Five random lowercase alphanumerics
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

fn work_mount(mount_path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: WORK_VOLUME_NAME.to_string(),
        mount_path: mount_path.to_string(),
        sub_path: sub_path.map(str::to_string),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn hostname_affinity(node: String) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
