//! Kubehook
//!
//! Container hook for CI runners that run as Kubernetes pods. The runner
//! pipes one JSON request per lifecycle event into this binary:
//! - `prepare_job` creates the job pod and reports it back
//! - `run_script_step` runs a step inside the job pod
//! - `run_container_step` runs a step in its own short-lived pod
//! - `cleanup_job` removes everything the hook created for the runner
//!
//! Step output goes to stdout; all logging goes to stderr.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, handle_input};
use kubehook_core::HookInput;
use kubehook_pod::HookConfig;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEBUG_FILTER: &str =
    "kubehook=debug,kubehook_cli=debug,kubehook_pod=debug,kubehook_registry=debug,kubehook_core=debug";

#[derive(Parser)]
#[command(name = "kubehook")]
#[command(about = "Kubernetes container hook for CI runners", long_about = None)]
struct Cli {
    /// Read the hook request from a file instead of stdin
    #[arg(long, short)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(exit_status(code)),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    if let Some(Commands::Version) = cli.command {
        println!("kubehook version: {}", env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let raw = match &cli.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hook input from {}", path.display()))?,
        None => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                println!(
                    "No piped input detected. This hook is intended to be run by the GitHub Actions runner."
                );
                return Ok(0);
            }
            std::io::read_to_string(stdin).context("Failed to read hook input from stdin")?
        }
    };

    let input = HookInput::from_json(&raw).context("Unexpected JSON structure in hook input")?;
    debug!("Hook input: {:?}", input);

    let config = HookConfig::from_env();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Running {} for runner pod {} in namespace {}",
        input.command, config.runner_pod_name, config.namespace
    );

    handle_input(input, config).await
}

/// Installs the stderr subscriber
///
/// `RUST_LOG` wins when set; otherwise `DEBUG_HOOK=1` turns on debug output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if std::env::var("DEBUG_HOOK").as_deref() == Ok("1") {
            DEBUG_FILTER.into()
        } else {
            "info".into()
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Maps a step exit code onto a process exit status
///
/// Codes outside `0..=255` cannot be passed through and become `1`.
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
