//! `prepare_job` handler
//!
//! Clears whatever a previous job of this runner left behind, creates the
//! job pod and tells the runner its name through the response file.

use anyhow::{Context, Result};
use kubehook_core::{HookInput, HookResponse};
use kubehook_pod::{HookConfig, PodClient, PodPurpose};
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::warn_ignored;

pub async fn prepare_job(input: HookInput, config: HookConfig) -> Result<i32> {
    let container = input
        .args
        .container
        .as_ref()
        .context("prepare_job requires a job container")?;
    let response_file = input
        .response_file
        .as_deref()
        .filter(|f| !f.is_empty())
        .context("prepare_job requires a response file")?;

    warn_ignored(container, &input.args.services);

    let client = PodClient::connect(config)
        .await
        .context("Failed to talk to kubernetes")?;

    if let Err(e) = client.prune_pods().await {
        warn!("Failed to prune leftover pods: {}", e);
    }
    if let Err(e) = client.prune_secrets().await {
        warn!("Failed to prune leftover secrets: {}", e);
    }

    let pod = match client.create_pod(container, PodPurpose::Job).await {
        Ok(pod) => pod,
        Err(e) => {
            if let Some(created) = e.created_pod() {
                if let Err(cleanup) = client.delete_pod(created).await {
                    error!("Failed to clean up pod {}: {}", created, cleanup);
                }
            }
            return Err(e).context("Failed to create job pod");
        }
    };
    info!("Created pod {}", pod);

    let response = HookResponse::for_job_pod(&pod, container);
    write_response(Path::new(response_file), &response)?;
    Ok(0)
}

/// Writes the response document the runner reads back
fn write_response(path: &Path, response: &HookResponse) -> Result<()> {
    let body = serde_json::to_string_pretty(response)?;
    debug!("Writing response to {}: {}", path.display(), body);
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write response to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehook_core::ContainerDefinition;

    #[test]
    fn test_write_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response.json");
        let container = ContainerDefinition {
            image: "node:20".to_string(),
            ..Default::default()
        };

        write_response(&path, &HookResponse::for_job_pod("runner-0-workflow", &container)).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["state"]["jobPod"], "runner-0-workflow");
        assert_eq!(written["context"]["container"]["image"], "node:20");
        assert_eq!(written["context"]["services"], serde_json::json!([]));
        assert_eq!(written["isAlpine"], false);
    }

    #[test]
    fn test_write_response_to_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/response.json");
        let container = ContainerDefinition::default();

        assert!(write_response(&path, &HookResponse::for_job_pod("p", &container)).is_err());
    }

    #[tokio::test]
    async fn test_requires_job_container() {
        let input = HookInput::from_json(
            r#"{"command": "prepare_job", "responseFile": "/tmp/r.json", "args": {}, "state": {}}"#,
        )
        .unwrap();

        let err = prepare_job(input, HookConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("job container"));
    }
}
