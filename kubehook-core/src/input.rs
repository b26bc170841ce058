//! Hook input types
//!
//! The runner invokes the hook once per lifecycle event and pipes a single
//! JSON object into it. Fields are camelCase on the wire; list and map fields
//! tolerate explicit `null`.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// State key under which `prepare_job` records the job pod name
pub const JOB_POD_STATE_KEY: &str = "jobPod";

/// Lifecycle command requested by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookCommand {
    PrepareJob,
    CleanupJob,
    RunContainerStep,
    RunScriptStep,
}

impl fmt::Display for HookCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookCommand::PrepareJob => "prepare_job",
            HookCommand::CleanupJob => "cleanup_job",
            HookCommand::RunContainerStep => "run_container_step",
            HookCommand::RunScriptStep => "run_script_step",
        };
        f.write_str(name)
    }
}

/// Top-level envelope read from stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInput {
    pub command: HookCommand,

    #[serde(default, deserialize_with = "null_as_default")]
    pub args: InputArgs,

    /// Where `prepare_job` writes its response
    #[serde(default)]
    pub response_file: Option<String>,

    /// Free-form state carried between invocations by the runner
    #[serde(default, deserialize_with = "null_as_default")]
    pub state: HashMap<String, String>,
}

impl HookInput {
    /// Parses an envelope from its JSON text
    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        serde_json::from_str(input)
    }

    /// Name of the job pod recorded by `prepare_job`, if any
    pub fn job_pod(&self) -> Option<&str> {
        self.state
            .get(JOB_POD_STATE_KEY)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

/// Command arguments
///
/// `prepare_job` sends the job container under `container`; the step
/// commands send their container definition or script fields at the top
/// level, which land in `step`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputArgs {
    #[serde(default)]
    pub container: Option<ContainerDefinition>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<ContainerDefinition>,

    #[serde(flatten)]
    pub step: ContainerDefinition,
}

/// A container as described by the runner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    #[serde(default, deserialize_with = "null_as_default")]
    pub image: String,

    #[serde(default, alias = "entrypoint")]
    pub entry_point: Option<String>,

    #[serde(default, alias = "entrypointArgs", deserialize_with = "null_as_default")]
    pub entry_point_args: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub environment_variables: IndexMap<String, String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub prepend_path: Vec<String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default)]
    pub registry: Option<RegistryAuth>,

    /// Raw container engine options; not supported on Kubernetes
    #[serde(default)]
    pub create_options: Option<serde_json::Value>,

    #[serde(default)]
    pub dockerfile: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub port_mappings: Vec<serde_json::Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub system_mount_volumes: Vec<MountVolume>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub user_mount_volumes: Vec<MountVolume>,
}

impl ContainerDefinition {
    /// Entrypoint, treating an empty string as unset
    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref().filter(|e| !e.is_empty())
    }

    /// Working directory, treating an empty string as unset
    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref().filter(|w| !w.is_empty())
    }

    /// Whether the runner passed engine-specific create options
    pub fn has_create_options(&self) -> bool {
        match &self.create_options {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(serde_json::Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        }
    }

    /// Whether a Dockerfile build was requested instead of a prebuilt image
    pub fn has_dockerfile(&self) -> bool {
        self.dockerfile.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// Port mappings declared on the container, keyed by container port
    ///
    /// Accepts `"host:container"` and `"port"` strings as well as
    /// `{ "container": host }` objects. Entries in other shapes are skipped.
    pub fn declared_ports(&self) -> BTreeMap<String, String> {
        let mut ports = BTreeMap::new();
        for mapping in &self.port_mappings {
            match mapping {
                serde_json::Value::String(s) => {
                    let spec = s.split('/').next().unwrap_or_default();
                    match spec.rsplit_once(':') {
                        Some((host, container)) => {
                            let host = host.rsplit(':').next().unwrap_or(host);
                            ports.insert(container.to_string(), host.to_string());
                        }
                        None if !spec.is_empty() => {
                            ports.insert(spec.to_string(), spec.to_string());
                        }
                        None => {}
                    }
                }
                serde_json::Value::Number(n) => {
                    ports.insert(n.to_string(), n.to_string());
                }
                serde_json::Value::Object(map) => {
                    for (container, host) in map {
                        let host = match host {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        ports.insert(container.clone(), host);
                    }
                }
                _ => {}
            }
        }
        ports
    }
}

/// Credentials for a private registry
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default, alias = "serverurl", alias = "serverURL")]
    pub server_url: Option<String>,
}

impl RegistryAuth {
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref().filter(|s| !s.is_empty())
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("server_url", &self.server_url)
            .finish()
    }
}

/// A volume the runner would like mounted into the container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountVolume {
    #[serde(default)]
    pub source_volume_path: Option<String>,

    #[serde(default)]
    pub target_volume_path: String,

    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub user_provided_value: Option<serde_json::Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
