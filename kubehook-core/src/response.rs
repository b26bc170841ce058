//! Hook response types
//!
//! Only `prepare_job` produces a response document. The runner reads it back
//! to learn which pod hosts the job and carries `state` into later calls.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::input::ContainerDefinition;

/// Response written to the runner-provided response file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResponse {
    pub state: ResponseState,
    pub context: ResponseContext,
    pub is_alpine: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseState {
    pub job_pod: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseContext {
    pub container: ContainerInfo,
    pub services: Vec<ContainerInfo>,
}

/// Image and port mapping of a container the job can reach
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub image: String,
    pub ports: BTreeMap<String, String>,
}

impl HookResponse {
    /// Builds the response for a freshly created job pod
    ///
    /// # Arguments
    /// * `job_pod` - Name of the pod hosting the job container
    /// * `container` - The job container definition it was created from
    pub fn for_job_pod(job_pod: impl Into<String>, container: &ContainerDefinition) -> Self {
        Self {
            state: ResponseState {
                job_pod: job_pod.into(),
            },
            context: ResponseContext {
                container: ContainerInfo {
                    image: container.image.clone(),
                    ports: container.declared_ports(),
                },
                services: Vec::new(),
            },
            is_alpine: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_wire_format() {
        let container = ContainerDefinition {
            image: "alpine:3.20".to_string(),
            port_mappings: vec![serde_json::json!("8080:80")],
            ..Default::default()
        };
        let response = HookResponse::for_job_pod("runner-0-workflow", &container);
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["state"]["jobPod"], "runner-0-workflow");
        assert_eq!(value["context"]["container"]["image"], "alpine:3.20");
        assert_eq!(value["context"]["container"]["ports"]["80"], "8080");
        assert_eq!(value["context"]["services"], serde_json::json!([]));
        assert_eq!(value["isAlpine"], false);
    }
}
