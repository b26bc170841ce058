//! Error types for the pod lifecycle

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::extension::ExtensionError;
use crate::readiness::FailureReason;

/// Result type alias for pod lifecycle operations
pub type Result<T> = std::result::Result<T, HookError>;

/// Errors that can occur while managing a job or step pod
#[derive(Debug, Error)]
pub enum HookError {
    /// Neither in-cluster nor kubeconfig credentials could be used
    #[error("Failed to connect to Kubernetes: {0}")]
    Connection(String),

    /// The runner asked for something pods cannot express
    #[error("Feature not supported in kubernetes hook: {0}")]
    Unsupported(String),

    /// The API server rejected a create request
    #[error("Failed to create {kind} {name}: {source}")]
    Creation {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The create request was rejected for lack of permissions
    #[error("Not permitted to create {kind} {name}: {source}")]
    Authorization {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The pod was created but reached a state it will not recover from
    #[error("Pod {pod} failed to start: {reason}")]
    Readiness { pod: String, reason: FailureReason },

    /// The pod was created but did not become ready before the deadline
    #[error("Timeout waiting {} seconds for pod {pod} to be ready", .timeout.as_secs())]
    ReadinessTimeout { pod: String, timeout: Duration },

    /// The exec stream could not be opened or broke down
    #[error("Exec in pod {pod} failed: {message}")]
    ExecTransport { pod: String, message: String },

    /// Input rejected before any remote action
    #[error("Validation error: {0}")]
    Validation(String),

    /// The pod extension template could not be applied
    #[error("Failed to apply pod extension {}: {source}", .path.display())]
    Extension {
        path: PathBuf,
        #[source]
        source: ExtensionError,
    },

    /// Deleting or pruning hook-owned objects failed
    #[error("Failed to clean up {target}: {source}")]
    Cleanup {
        target: String,
        #[source]
        source: kube::Error,
    },

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HookError {
    /// Classifies a failed create request
    pub(crate) fn from_create(kind: &'static str, name: impl Into<String>, source: kube::Error) -> Self {
        let name = name.into();
        if is_forbidden(&source) {
            Self::Authorization { kind, name, source }
        } else {
            Self::Creation { kind, name, source }
        }
    }

    /// Name of a pod that exists on the cluster despite this error
    ///
    /// Readiness failures happen after submission, so the caller still owns
    /// a pod that needs deleting.
    pub fn created_pod(&self) -> Option<&str> {
        match self {
            Self::Readiness { pod, .. } | Self::ReadinessTimeout { pod, .. } => Some(pod),
            _ => None,
        }
    }

    /// Check if this error is an authorization failure
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// Check if this error is a readiness timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. })
    }
}

/// Check if an API error is a 401/403 status
pub(crate) fn is_forbidden(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 401 || response.code == 403)
}
