//! Kubehook Core
//!
//! Shared types for the Kubernetes container hook.
//!
//! This crate contains:
//! - Input types: the JSON envelope the CI runner pipes into the hook
//! - Response types: the JSON document `prepare_job` hands back to the runner

pub mod input;
pub mod response;

pub use input::{ContainerDefinition, HookCommand, HookInput, InputArgs, MountVolume, RegistryAuth};
pub use response::{ContainerInfo, HookResponse, ResponseContext, ResponseState};
