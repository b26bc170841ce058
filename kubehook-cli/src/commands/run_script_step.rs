//! `run_script_step` handler

use anyhow::{Context, Result};
use kubehook_core::HookInput;
use kubehook_pod::{HookConfig, PodClient};

use super::cancel_on_ctrl_c;

/// Runs the step inside the job pod and passes its exit code through
pub async fn run_script_step(input: HookInput, config: HookConfig) -> Result<i32> {
    let pod = input
        .job_pod()
        .context("No job pod recorded in state, was prepare_job run?")?;

    let client = PodClient::connect(config)
        .await
        .context("Failed to talk to kubernetes")?;

    client
        .exec_step_in_pod(pod, &input.args.step, cancel_on_ctrl_c())
        .await
        .with_context(|| format!("Failed to execute step in pod {}", pod))
}
