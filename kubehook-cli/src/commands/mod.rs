//! Commands module
//!
//! Maps each hook request onto its handler. Handlers return the exit code
//! the runner should see; errors are reported by `main` as failure.

mod cleanup_job;
mod prepare_job;
mod run_container_step;
mod run_script_step;

use anyhow::Result;
use clap::Subcommand;
use kubehook_core::{ContainerDefinition, HookCommand, HookInput};
use kubehook_pod::HookConfig;
use std::future::Future;
use tracing::warn;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print the hook version
    Version,
}

/// Handle a hook request
///
/// # Arguments
/// * `input` - The parsed request from the runner
/// * `config` - Hook configuration read from the environment
///
/// # Returns
/// Exit code for the process
pub async fn handle_input(input: HookInput, config: HookConfig) -> Result<i32> {
    match input.command {
        HookCommand::PrepareJob => prepare_job::prepare_job(input, config).await,
        HookCommand::CleanupJob => cleanup_job::cleanup_job(input, config).await,
        HookCommand::RunContainerStep => {
            run_container_step::run_container_step(input, config).await
        }
        HookCommand::RunScriptStep => run_script_step::run_script_step(input, config).await,
    }
}

/// Resolves when the process receives Ctrl-C
///
/// Never resolves if the signal handler cannot be installed.
pub(crate) fn cancel_on_ctrl_c() -> impl Future<Output = ()> {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Logs the parts of a request that single-container pods cannot honour
pub(crate) fn warn_ignored(container: &ContainerDefinition, services: &[ContainerDefinition]) {
    if !services.is_empty() {
        warn!(
            "Service containers are not supported, ignoring {} service(s)",
            services.len()
        );
    }
    if !container.user_mount_volumes.is_empty() {
        warn!(
            "User volume mounts are not supported, ignoring {} mount(s)",
            container.user_mount_volumes.len()
        );
    }
}
