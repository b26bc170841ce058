//! Running step scripts inside the job container
//!
//! The script is staged in the runner temp directory, which the job
//! container sees through the shared work volume, and executed with
//! `sh -e` over an exec websocket. Remote output is relayed to this
//! process's stdout and stderr as it arrives.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::Api;
use kube::api::AttachParams;
use std::future::Future;
use std::path::Path;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::error::{HookError, Result};
use crate::script::StagedScript;
use crate::spec::JOB_CONTAINER_NAME;

const STATUS_SUCCESS: &str = "Success";
const REASON_NON_ZERO_EXIT: &str = "NonZeroExitCode";
const CAUSE_EXIT_CODE: &str = "ExitCode";

/// Stages `script` and runs it in the job container of `pod`
///
/// # Arguments
/// * `pods` - Pod API scoped to the hook namespace
/// * `pod` - Name of a running pod
/// * `runner_temp` - Local directory backing `/__w/_temp`
/// * `script` - Script text from [`crate::script::build_script`]
/// * `cancel` - Resolves when the caller wants the stream torn down
///
/// # Returns
/// The remote exit code. Only a broken or cancelled stream is an error.
pub async fn run_script<C>(
    pods: &Api<Pod>,
    pod: &str,
    runner_temp: &Path,
    script: &str,
    cancel: C,
) -> Result<i32>
where
    C: Future<Output = ()>,
{
    let staged = StagedScript::write(runner_temp, script)?;
    let command = vec![
        "sh".to_string(),
        "-e".to_string(),
        staged.container_path().to_string(),
    ];

    let result = run_command(pods, pod, command, cancel).await;
    staged.remove();
    result
}

/// Runs `command` in the job container and streams its output
pub async fn run_command<C>(pods: &Api<Pod>, pod: &str, command: Vec<String>, cancel: C) -> Result<i32>
where
    C: Future<Output = ()>,
{
    debug!("Exec in pod {}: {}", pod, command.join(" "));

    let params = AttachParams::default()
        .container(JOB_CONTAINER_NAME)
        .stdin(false)
        .stdout(true)
        .stderr(true);

    let mut attached = pods
        .exec(pod, command, &params)
        .await
        .map_err(|e| transport(pod, e))?;

    let stdout = attached.stdout();
    let stderr = attached.stderr();
    let status = attached.take_status();

    let relay = async {
        tokio::try_join!(
            relay_stream(stdout, tokio::io::stdout()),
            relay_stream(stderr, tokio::io::stderr()),
        )?;
        Ok::<_, std::io::Error>(match status {
            Some(status) => status.await,
            None => None,
        })
    };

    let status = tokio::select! {
        result = relay => result.map_err(|e| transport(pod, e))?,
        _ = cancel => {
            info!("Cancelling exec in pod {}", pod);
            attached.abort();
            return Err(transport(pod, "cancelled"));
        }
    };

    if let Err(e) = attached.join().await {
        warn!("Exec session for pod {} did not close cleanly: {}", pod, e);
    }

    let status = status.ok_or_else(|| transport(pod, "stream closed without an exit status"))?;
    let code = exit_code(&status).map_err(|message| transport(pod, message))?;
    debug!("Exec in pod {} exited with code {}", pod, code);
    Ok(code)
}

/// Reads the exit code out of the status frame that ends an exec stream
pub fn exit_code(status: &Status) -> std::result::Result<i32, String> {
    if status.status.as_deref() == Some(STATUS_SUCCESS) {
        return Ok(0);
    }

    if status.reason.as_deref() == Some(REASON_NON_ZERO_EXIT) {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .into_iter()
            .flatten()
            .find(|cause| cause.reason.as_deref() == Some(CAUSE_EXIT_CODE))
            .and_then(|cause| cause.message.as_deref())
            .and_then(|message| message.trim().parse::<i32>().ok());
        if let Some(code) = code {
            return Ok(code);
        }
    }

    Err(status
        .message
        .clone()
        .unwrap_or_else(|| format!("exec failed with status {:?}", status.status)))
}

async fn relay_stream<R, W>(reader: Option<R>, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    if let Some(mut reader) = reader {
        tokio::io::copy(&mut reader, &mut writer).await?;
    }
    Ok(())
}

fn transport(pod: &str, message: impl ToString) -> HookError {
    HookError::ExecTransport {
        pod: pod.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

    fn non_zero(code: &str) -> Status {
        Status {
            status: Some("Failure".to_string()),
            reason: Some("NonZeroExitCode".to_string()),
            message: Some(format!("command terminated with non-zero exit code: {}", code)),
            details: Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason: Some("ExitCode".to_string()),
                    message: Some(code.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_success_is_zero() {
        let status = Status {
            status: Some("Success".to_string()),
            ..Default::default()
        };
        assert_eq!(exit_code(&status), Ok(0));
    }

    #[test]
    fn test_non_zero_exit_code() {
        assert_eq!(exit_code(&non_zero("3")), Ok(3));
        assert_eq!(exit_code(&non_zero("137")), Ok(137));
    }

    #[test]
    fn test_other_failures_are_errors() {
        let status = Status {
            status: Some("Failure".to_string()),
            reason: Some("InternalError".to_string()),
            message: Some("container not found".to_string()),
            ..Default::default()
        };
        assert_eq!(exit_code(&status), Err("container not found".to_string()));

        assert!(exit_code(&non_zero("not-a-number")).is_err());
    }

    #[tokio::test]
    async fn test_relay_copies_everything() {
        let input: &[u8] = b"line one\nline two\n";
        let mut output = Vec::new();
        relay_stream(Some(input), &mut output).await.unwrap();
        assert_eq!(output, input);

        let mut untouched = Vec::new();
        relay_stream(None::<&[u8]>, &mut untouched).await.unwrap();
        assert!(untouched.is_empty());
    }

    #[tokio::test]
    async fn test_script_removed_when_exec_fails() {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        let pods: Api<Pod> = Api::namespaced(client, "ci");
        let temp = tempfile::tempdir().unwrap();

        let result = run_script(&pods, "runner-workflow", temp.path(), "echo hi\n", std::future::pending()).await;

        assert!(matches!(result, Err(HookError::ExecTransport { ref pod, .. }) if pod == "runner-workflow"));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
