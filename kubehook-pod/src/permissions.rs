//! Permission diagnostics
//!
//! When the API server refuses a create, the hook asks it which of the
//! verbs it relies on are actually granted, so the log names the missing
//! RBAC rules instead of only echoing a 403.

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::{error, info, warn};

/// A resource and verb the hook needs in its namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredPermission {
    pub resource: &'static str,
    pub subresource: Option<&'static str>,
    pub verb: &'static str,
}

impl RequiredPermission {
    const fn new(resource: &'static str, subresource: Option<&'static str>, verb: &'static str) -> Self {
        Self {
            resource,
            subresource,
            verb,
        }
    }

    /// `verb resource[/subresource]`, as it reads in an RBAC rule
    pub fn describe(&self) -> String {
        match self.subresource {
            Some(sub) => format!("{} {}/{}", self.verb, self.resource, sub),
            None => format!("{} {}", self.verb, self.resource),
        }
    }
}

/// Everything the hook does against the API server
pub const REQUIRED_PERMISSIONS: &[RequiredPermission] = &[
    RequiredPermission::new("pods", None, "create"),
    RequiredPermission::new("pods", None, "get"),
    RequiredPermission::new("pods", None, "list"),
    RequiredPermission::new("pods", None, "watch"),
    RequiredPermission::new("pods", None, "delete"),
    RequiredPermission::new("pods", Some("exec"), "create"),
    RequiredPermission::new("secrets", None, "create"),
    RequiredPermission::new("secrets", None, "list"),
    RequiredPermission::new("secrets", None, "delete"),
];

/// Builds the access review asking whether `permission` is granted in `namespace`
pub fn access_review(namespace: &str, permission: &RequiredPermission) -> SelfSubjectAccessReview {
    SelfSubjectAccessReview {
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                namespace: Some(namespace.to_string()),
                resource: Some(permission.resource.to_string()),
                subresource: permission.subresource.map(str::to_string),
                verb: Some(permission.verb.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Logs which required permissions are missing in `namespace`
///
/// Never fails; problems running the reviews are logged at warn.
pub async fn log_permission_diagnostics(client: Client, namespace: &str) {
    let reviews: Api<SelfSubjectAccessReview> = Api::all(client);
    let mut denied = Vec::new();

    for permission in REQUIRED_PERMISSIONS {
        let review = access_review(namespace, permission);
        match reviews.create(&PostParams::default(), &review).await {
            Ok(result) => {
                let allowed = result.status.as_ref().is_some_and(|s| s.allowed);
                if !allowed {
                    denied.push(permission.describe());
                }
            }
            Err(e) => {
                warn!(
                    "Could not check permission to {}: {}",
                    permission.describe(),
                    e
                );
            }
        }
    }

    if denied.is_empty() {
        info!("All required permissions are granted in namespace {}", namespace);
    } else {
        error!(
            "Missing permissions in namespace {}: {}",
            namespace,
            denied.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_review() {
        let exec = REQUIRED_PERMISSIONS
            .iter()
            .find(|p| p.subresource == Some("exec"))
            .unwrap();
        let review = access_review("ci", exec);
        let attributes = review.spec.resource_attributes.unwrap();

        assert_eq!(attributes.namespace.as_deref(), Some("ci"));
        assert_eq!(attributes.resource.as_deref(), Some("pods"));
        assert_eq!(attributes.subresource.as_deref(), Some("exec"));
        assert_eq!(attributes.verb.as_deref(), Some("create"));
    }

    #[test]
    fn test_required_permissions() {
        let described: Vec<String> = REQUIRED_PERMISSIONS.iter().map(|p| p.describe()).collect();
        assert_eq!(described.len(), 9);
        assert!(described.contains(&"watch pods".to_string()));
        assert!(described.contains(&"create pods/exec".to_string()));
        assert!(described.contains(&"delete secrets".to_string()));
    }
}
