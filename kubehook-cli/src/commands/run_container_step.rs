//! `run_container_step` handler
//!
//! Container steps get a pod of their own running the step's image. The
//! pod is always deleted afterwards, and a failed deletion never hides the
//! step's own result.

use anyhow::{Context, Result, bail};
use kubehook_core::{ContainerDefinition, HookInput};
use kubehook_pod::{HookConfig, PodClient, PodPurpose};
use kubehook_registry::{EntrypointInspector, RegistryClient};
use tracing::{debug, error, info, warn};

use super::{cancel_on_ctrl_c, warn_ignored};

pub async fn run_container_step(input: HookInput, config: HookConfig) -> Result<i32> {
    let mut step = input.args.step.clone();

    if step.has_dockerfile() {
        bail!("Self hosted container steps do not support Docker builder at this time");
    }

    if step.entry_point().is_none() {
        let registry = if config.inspect_image {
            Some(RegistryClient::new().context("Failed to set up registry client")?)
        } else {
            None
        };
        let inspector = registry.as_ref().map(|r| r as &dyn EntrypointInspector);
        step.entry_point = Some(resolve_entrypoint(&step, &config, inspector).await?);
    }

    warn_ignored(&step, &input.args.services);

    let client = PodClient::connect(config)
        .await
        .context("Failed to talk to kubernetes")?;

    let pod = match client.create_pod(&step, PodPurpose::Step).await {
        Ok(pod) => pod,
        Err(e) => {
            if let Some(created) = e.created_pod() {
                if let Err(cleanup) = client.delete_pod(created).await {
                    error!("Failed to clean up pod {}: {}", created, cleanup);
                }
            }
            return Err(e).context("Failed to create step pod");
        }
    };

    let result = client
        .exec_step_in_pod(&pod, &step, cancel_on_ctrl_c())
        .await;

    let cleanup = client.delete_pod(&pod).await;
    if let Err(e) = &cleanup {
        error!("Failed to clean up pod {}: {}", pod, e);
    }

    let code = result.with_context(|| format!("Failed to run container in pod {}", pod))?;
    Ok(step_exit_code(code, cleanup.is_ok()))
}

/// Finds the command a container step runs when its definition names none
///
/// Tries the image's own entrypoint when an inspector is given, then the
/// configured fallback.
async fn resolve_entrypoint(
    step: &ContainerDefinition,
    config: &HookConfig,
    inspector: Option<&dyn EntrypointInspector>,
) -> Result<String> {
    if let Some(inspector) = inspector {
        info!("Inspecting image {} for its entrypoint", step.image);
        match inspector.entrypoint(&step.image, step.registry.as_ref()).await {
            Ok(Some(entrypoint)) => {
                info!("Using entrypoint {} from image {}", entrypoint, step.image);
                return Ok(entrypoint);
            }
            Ok(None) => debug!("Image {} has no entrypoint defined", step.image),
            Err(e) => warn!(
                "Failed to inspect image {} for entrypoint, falling back to configuration: {}",
                step.image, e
            ),
        }
    }

    if let Some(entrypoint) = &config.container_step_entrypoint {
        info!(
            "Entrypoint not set, using ENV_HOOK_CONTAINER_STEP_ENTRYPOINT {}",
            entrypoint
        );
        return Ok(entrypoint.clone());
    }

    bail!("Self hosted container steps require an entrypoint to be set")
}

/// Exit code of the hook after a step ran
///
/// A successful step still fails the hook if its pod could not be removed.
fn step_exit_code(code: i32, cleaned_up: bool) -> i32 {
    if code == 0 && !cleaned_up { 1 } else { code }
}
