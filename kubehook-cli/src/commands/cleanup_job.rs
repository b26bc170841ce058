//! `cleanup_job` handler

use anyhow::{Context, Result};
use kubehook_core::HookInput;
use kubehook_pod::{HookConfig, PodClient};
use tracing::{debug, error};

/// Deletes the job pod, then everything else labelled with this runner
///
/// Every step is attempted; the exit code is non-zero if any failed.
pub async fn cleanup_job(input: HookInput, config: HookConfig) -> Result<i32> {
    let client = PodClient::connect(config)
        .await
        .context("Failed to talk to kubernetes")?;

    let mut failed = false;

    match input.job_pod() {
        Some(pod) => {
            if let Err(e) = client.delete_pod(pod).await {
                error!("Failed to clean up pod {}: {}", pod, e);
                failed = true;
            }
        }
        None => debug!("No job pod recorded in state"),
    }

    if let Err(e) = client.prune_pods().await {
        error!("Failed to prune pods: {}", e);
        failed = true;
    }

    if let Err(e) = client.prune_secrets().await {
        error!("Failed to prune secrets: {}", e);
        failed = true;
    }

    Ok(if failed { 1 } else { 0 })
}
