//! Kubehook pod lifecycle
//!
//! Everything the hook does against the cluster on behalf of a runner:
//! building job and step pod manifests, merging operator extension
//! templates, waiting for readiness, streaming step scripts through exec,
//! and pruning what the runner left behind.
//!
//! # Example
//!
//! ```no_run
//! use kubehook_core::ContainerDefinition;
//! use kubehook_pod::{HookConfig, PodClient, PodPurpose};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = PodClient::connect(HookConfig::from_env()).await?;
//!
//!     let container = ContainerDefinition {
//!         image: "alpine:latest".to_string(),
//!         ..Default::default()
//!     };
//!     let pod = client.create_pod(&container, PodPurpose::Job).await?;
//!
//!     let step = ContainerDefinition {
//!         entry_point: Some("echo".to_string()),
//!         entry_point_args: vec!["hello".to_string()],
//!         ..Default::default()
//!     };
//!     let code = client
//!         .exec_step_in_pod(&pod, &step, std::future::pending())
//!         .await?;
//!     println!("step exited with {}", code);
//!
//!     client.delete_pod(&pod).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod exec;
pub mod extension;
pub mod externals;
pub mod permissions;
pub mod readiness;
pub mod script;
pub mod secret;
pub mod spec;

// Re-export commonly used types
pub use client::PodClient;
pub use config::HookConfig;
pub use error::{HookError, Result};
pub use readiness::{FailureReason, ReadinessOutcome};
pub use spec::{JOB_CONTAINER_NAME, Placement, PodPurpose, PodSpecBuilder, RUNNER_POD_LABEL};
