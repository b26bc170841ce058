//! Pod lifecycle client
//!
//! Owns the cluster connection and ties the builder, watcher and exec
//! streamer together. Callers drive one pod at a time:
//! create, exec any number of times, delete.

use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Config};
use kubehook_core::{ContainerDefinition, RegistryAuth};
use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::config::HookConfig;
use crate::error::{HookError, Result};
use crate::exec::run_script;
use crate::externals::copy_externals;
use crate::permissions::log_permission_diagnostics;
use crate::readiness::{ReadinessOutcome, wait_for_pod_ready};
use crate::script::build_script;
use crate::secret::{build_pull_secret, pull_secret_name};
use crate::spec::{Placement, PodPurpose, PodSpecBuilder, attach_pull_secret};

/// Client for managing job and step pods of one runner
pub struct PodClient {
    client: Client,
    pods: Api<Pod>,
    secrets: Api<Secret>,
    config: HookConfig,
}

impl PodClient {
    /// Connects with in-cluster credentials, falling back to the local kubeconfig
    pub async fn connect(config: HookConfig) -> Result<Self> {
        let kube_config = match Config::incluster() {
            Ok(kube_config) => {
                debug!("Using in-cluster configuration");
                kube_config
            }
            Err(in_cluster) => {
                debug!("In-cluster configuration unavailable: {}", in_cluster);
                Config::from_kubeconfig(&KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        HookError::Connection(format!(
                            "no in-cluster credentials ({}) and no usable kubeconfig ({})",
                            in_cluster, e
                        ))
                    })?
            }
        };

        let client =
            Client::try_from(kube_config).map_err(|e| HookError::Connection(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    /// Wraps an existing client
    pub fn with_client(client: Client, config: HookConfig) -> Self {
        let pods = Api::namespaced(client.clone(), &config.namespace);
        let secrets = Api::namespaced(client.clone(), &config.namespace);
        Self {
            client,
            pods,
            secrets,
            config,
        }
    }

    /// Creates a pod for `container` and waits until it is running
    ///
    /// # Arguments
    /// * `container` - Container definition from the runner
    /// * `purpose` - Job pod or step pod
    ///
    /// # Returns
    /// The name of the running pod. Readiness errors carry the name of the
    /// pod that was created, see [`HookError::created_pod`].
    pub async fn create_pod(
        &self,
        container: &ContainerDefinition,
        purpose: PodPurpose,
    ) -> Result<String> {
        let builder = PodSpecBuilder::new(&self.config);
        builder.check(container)?;

        let node_name = self.runner_node_name().await;
        let placement = Placement::for_node(&self.config, node_name);

        let mut pod = builder.build(container, purpose, placement)?;
        let name = pod.metadata.name.clone().unwrap_or_default();

        if let Some(auth) = container.registry.as_ref().filter(|r| r.username().is_some()) {
            if let Some(secret) = self.provision_pull_secret(auth).await {
                attach_pull_secret(&mut pod, secret);
            }
        }

        if purpose == PodPurpose::Job {
            self.stage_externals();
        }

        info!("Creating pod {} with image {}", name, container.image);
        if let Err(e) = self.pods.create(&PostParams::default(), &pod).await {
            let err = HookError::from_create("pod", &name, e);
            if err.is_authorization() {
                log_permission_diagnostics(self.client.clone(), &self.config.namespace).await;
            }
            return Err(err);
        }

        let timeout = self.config.readiness_timeout;
        match wait_for_pod_ready(self.pods.clone(), &name, timeout).await {
            ReadinessOutcome::Ready { .. } => {
                info!("Pod {} is ready", name);
                Ok(name)
            }
            ReadinessOutcome::Failed(reason) => Err(HookError::Readiness { pod: name, reason }),
            ReadinessOutcome::TimedOut => Err(HookError::ReadinessTimeout { pod: name, timeout }),
        }
    }

    /// Deletes a pod by name
    ///
    /// A pod that is already gone counts as deleted.
    pub async fn delete_pod(&self, name: &str) -> Result<()> {
        info!("Deleting pod {}", name);
        match self.pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("Pod {} was already deleted", name);
                Ok(())
            }
            Err(source) => Err(HookError::Cleanup {
                target: format!("pod {}", name),
                source,
            }),
        }
    }

    /// Deletes every pod labelled with this runner
    ///
    /// Stops at the first failed deletion.
    pub async fn prune_pods(&self) -> Result<()> {
        let params = ListParams::default().labels(&self.config.runner_selector());
        let pods = self
            .pods
            .list(&params)
            .await
            .map_err(|source| HookError::Cleanup {
                target: "pods".to_string(),
                source,
            })?;

        for pod in pods.items {
            let Some(name) = pod.metadata.name else {
                continue;
            };
            info!("Pruning pod {}", name);
            self.delete_pod(&name).await?;
        }
        Ok(())
    }

    /// Deletes every secret labelled with this runner
    ///
    /// Stops at the first failed deletion.
    pub async fn prune_secrets(&self) -> Result<()> {
        let params = ListParams::default().labels(&self.config.runner_selector());
        let secrets = self
            .secrets
            .list(&params)
            .await
            .map_err(|source| HookError::Cleanup {
                target: "secrets".to_string(),
                source,
            })?;

        for secret in secrets.items {
            let Some(name) = secret.metadata.name else {
                continue;
            };
            info!("Pruning secret {}", name);
            match self.secrets.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    debug!("Secret {} was already deleted", name);
                }
                Err(source) => {
                    return Err(HookError::Cleanup {
                        target: format!("secret {}", name),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Runs the step described by `step` inside the job container of `pod`
    ///
    /// # Arguments
    /// * `pod` - Name of a running pod
    /// * `step` - Entrypoint, arguments, environment, path and working directory
    /// * `cancel` - Resolves when the step should be abandoned
    ///
    /// # Returns
    /// The step's exit code
    pub async fn exec_step_in_pod<C>(
        &self,
        pod: &str,
        step: &ContainerDefinition,
        cancel: C,
    ) -> Result<i32>
    where
        C: Future<Output = ()>,
    {
        let entry_point = step
            .entry_point()
            .ok_or_else(|| HookError::Validation("step has no entrypoint".to_string()))?;

        let script = build_script(
            entry_point,
            &step.entry_point_args,
            &step.environment_variables,
            &step.prepend_path,
            step.working_directory(),
        )?;

        run_script(&self.pods, pod, &self.config.runner_temp, &script, cancel).await
    }

    /// Node the runner pod is scheduled on, if it can be read
    async fn runner_node_name(&self) -> Option<String> {
        match self.pods.get(&self.config.runner_pod_name).await {
            Ok(pod) => pod.spec.and_then(|spec| spec.node_name),
            Err(e) => {
                warn!(
                    "Failed to read runner pod {}: {}",
                    self.config.runner_pod_name, e
                );
                None
            }
        }
    }

    /// Creates a pull secret for `auth`, returning its name
    ///
    /// Failure is logged and yields no secret; the pull may still work if
    /// the image is public or already cached on the node.
    async fn provision_pull_secret(&self, auth: &RegistryAuth) -> Option<String> {
        let name = pull_secret_name(&self.config);
        let secret = build_pull_secret(&self.config, &name, auth);

        match self.secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                info!("Created image pull secret {}", name);
                Some(name)
            }
            Err(e) => {
                error!("Failed to create image pull secret {}: {}", name, e);
                None
            }
        }
    }

    fn stage_externals(&self) {
        let Some(workspace) = &self.config.runner_workspace else {
            debug!("RUNNER_WORKSPACE not set, skipping externals copy");
            return;
        };
        if let Err(e) = copy_externals(workspace) {
            warn!("Failed to copy externals: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::REQUIRED_PERMISSIONS;
    use crate::readiness::FailureReason;
    use http::{Request, Response};
    use kube::client::Body;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const PODS: &str = "/api/v1/namespaces/ci/pods";
    const RUNNER_POD: &str = "/api/v1/namespaces/ci/pods/runner-0";
    const SECRETS: &str = "/api/v1/namespaces/ci/secrets";
    const REVIEWS: &str = "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews";

    /// Requests the fake API server received, as `METHOD /path`
    type Requests = Arc<Mutex<Vec<String>>>;

    fn config() -> HookConfig {
        HookConfig {
            namespace: "ci".to_string(),
            runner_pod_name: "runner-0".to_string(),
            claim_name: "runner-0-work".to_string(),
            github_workspace: Some("/home/runner/_work/repo/repo".to_string()),
            readiness_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Client talking to a fake API server that answers with `respond(method, path)`
    fn fake_client<F>(config: HookConfig, respond: F) -> (PodClient, Requests)
    where
        F: Fn(&str, &str) -> (u16, Value) + Send + Sync + 'static,
    {
        let requests = Requests::default();
        let seen = requests.clone();
        let service = tower::service_fn(move |request: Request<Body>| {
            let method = request.method().to_string();
            let path = request.uri().path().to_string();
            seen.lock().unwrap().push(format!("{} {}", method, path));
            let (status, body) = respond(&method, &path);
            async move {
                Response::builder()
                    .status(status)
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
            }
        });

        let client = kube::Client::new(service, config.namespace.clone());
        (PodClient::with_client(client, config), requests)
    }

    fn failure(code: u16, reason: &str) -> (u16, Value) {
        let body = json!({
            "apiVersion": "v1",
            "kind": "Status",
            "status": "Failure",
            "message": reason,
            "reason": reason,
            "code": code,
        });
        (code, body)
    }

    fn object(kind: &str, name: &str) -> Value {
        json!({"apiVersion": "v1", "kind": kind, "metadata": {"name": name}})
    }

    fn list(kind: &str, items: Vec<Value>) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {"resourceVersion": "1"},
            "items": items,
        })
    }

    fn pod_with_status(name: &str, status: Value) -> Value {
        let mut pod = object("Pod", name);
        pod["status"] = status;
        pod
    }

    fn alpine() -> ContainerDefinition {
        ContainerDefinition {
            image: "alpine:latest".to_string(),
            ..Default::default()
        }
    }

    fn private_image() -> ContainerDefinition {
        ContainerDefinition {
            image: "ghcr.io/owner/private:latest".to_string(),
            registry: Some(RegistryAuth {
                username: Some("owner".to_string()),
                password: Some("token".to_string()),
                server_url: None,
            }),
            ..Default::default()
        }
    }

    fn recorded(requests: &Requests) -> Vec<String> {
        requests.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_delete_missing_pod_succeeds() {
        let (client, requests) = fake_client(config(), |_, _| failure(404, "NotFound"));

        client.delete_pod("gone").await.unwrap();
        assert_eq!(recorded(&requests), vec![format!("DELETE {}/gone", PODS)]);
    }

    #[tokio::test]
    async fn test_delete_failure_is_cleanup_error() {
        let (client, _) = fake_client(config(), |_, _| failure(500, "InternalError"));

        let err = client.delete_pod("stuck").await.unwrap_err();
        assert!(matches!(err, HookError::Cleanup { ref target, .. } if target == "pod stuck"));
    }

    #[tokio::test]
    async fn test_prune_pods_stops_at_first_failure() {
        let (client, requests) = fake_client(config(), |method, _| match method {
            "GET" => (
                200,
                list("PodList", vec![object("Pod", "runner-0-a"), object("Pod", "runner-0-b")]),
            ),
            _ => failure(500, "InternalError"),
        });

        let err = client.prune_pods().await.unwrap_err();
        assert!(matches!(err, HookError::Cleanup { .. }));
        assert_eq!(
            recorded(&requests),
            vec![format!("GET {}", PODS), format!("DELETE {}/runner-0-a", PODS)]
        );
    }

    #[tokio::test]
    async fn test_prune_secrets_tolerates_already_deleted() {
        let (client, requests) = fake_client(config(), |method, path| match (method, path) {
            ("GET", _) => (
                200,
                list("SecretList", vec![object("Secret", "gone"), object("Secret", "present")]),
            ),
            ("DELETE", p) if p.ends_with("/gone") => failure(404, "NotFound"),
            _ => (200, object("Secret", "present")),
        });

        client.prune_secrets().await.unwrap();
        assert_eq!(
            recorded(&requests),
            vec![
                format!("GET {}", SECRETS),
                format!("DELETE {}/gone", SECRETS),
                format!("DELETE {}/present", SECRETS),
            ]
        );
    }

    #[tokio::test]
    async fn test_prune_secrets_stops_at_first_failure() {
        let (client, requests) = fake_client(config(), |method, _| match method {
            "GET" => (
                200,
                list("SecretList", vec![object("Secret", "a"), object("Secret", "b")]),
            ),
            _ => failure(500, "InternalError"),
        });

        assert!(client.prune_secrets().await.is_err());
        assert_eq!(recorded(&requests).len(), 2);
    }

    #[tokio::test]
    async fn test_create_options_rejected_before_any_request() {
        let (client, requests) = fake_client(config(), |_, _| (200, json!({})));
        let mut container = private_image();
        container.create_options = Some(json!("--privileged"));

        let err = client.create_pod(&container, PodPurpose::Job).await.unwrap_err();
        assert!(matches!(err, HookError::Unsupported(_)));
        assert!(recorded(&requests).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_step_pod_leaves_no_secret() {
        let config = HookConfig {
            github_workspace: Some("/home/runner/src".to_string()),
            ..config()
        };
        let (client, requests) = fake_client(config, |_, _| failure(404, "NotFound"));

        let err = client.create_pod(&private_image(), PodPurpose::Step).await.unwrap_err();
        assert!(matches!(err, HookError::Validation(_)));
        assert_eq!(recorded(&requests), vec![format!("GET {}", RUNNER_POD)]);
    }

    #[tokio::test]
    async fn test_create_pod_with_pull_secret() {
        let (client, requests) = fake_client(config(), |method, path| match (method, path) {
            ("GET", RUNNER_POD) => {
                let mut runner = object("Pod", "runner-0");
                runner["spec"] = json!({"nodeName": "node-1", "containers": []});
                (200, runner)
            }
            ("POST", SECRETS) => (201, object("Secret", "runner-0-secret")),
            ("POST", PODS) => (201, object("Pod", "runner-0-workflow")),
            ("GET", PODS) => (
                200,
                list(
                    "PodList",
                    vec![pod_with_status("runner-0-workflow", json!({"phase": "Running"}))],
                ),
            ),
            _ => failure(404, "NotFound"),
        });

        let name = client.create_pod(&private_image(), PodPurpose::Job).await.unwrap();
        assert_eq!(name, "runner-0-workflow");
        assert_eq!(
            recorded(&requests)[..4],
            [
                format!("GET {}", RUNNER_POD),
                format!("POST {}", SECRETS),
                format!("POST {}", PODS),
                format!("GET {}", PODS),
            ]
        );
    }

    #[tokio::test]
    async fn test_forbidden_create_runs_permission_diagnostics() {
        let (client, requests) = fake_client(config(), |method, path| match (method, path) {
            ("POST", PODS) => failure(403, "Forbidden"),
            ("POST", REVIEWS) => (
                201,
                json!({
                    "apiVersion": "authorization.k8s.io/v1",
                    "kind": "SelfSubjectAccessReview",
                    "spec": {},
                    "status": {"allowed": false},
                }),
            ),
            _ => failure(404, "NotFound"),
        });

        let err = client.create_pod(&alpine(), PodPurpose::Job).await.unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(err.created_pod(), None);

        let reviews = recorded(&requests)
            .iter()
            .filter(|r| r.as_str() == format!("POST {}", REVIEWS))
            .count();
        assert_eq!(reviews, REQUIRED_PERMISSIONS.len());
    }

    #[tokio::test]
    async fn test_readiness_failure_names_created_pod() {
        let (client, _) = fake_client(config(), |method, path| match (method, path) {
            ("POST", PODS) => (201, object("Pod", "runner-0-workflow")),
            ("GET", PODS) => {
                let status = json!({
                    "phase": "Pending",
                    "containerStatuses": [{
                        "name": "job",
                        "image": "alpine:latest",
                        "imageID": "",
                        "ready": false,
                        "restartCount": 0,
                        "state": {"waiting": {"reason": "ImagePullBackOff", "message": "manifest unknown"}},
                    }],
                });
                (200, list("PodList", vec![pod_with_status("runner-0-workflow", status)]))
            }
            _ => failure(404, "NotFound"),
        });

        let err = client.create_pod(&alpine(), PodPurpose::Job).await.unwrap_err();
        assert!(matches!(
            err,
            HookError::Readiness {
                reason: FailureReason::ImagePull(ref message),
                ..
            } if message == "manifest unknown"
        ));
        assert_eq!(err.created_pod(), Some("runner-0-workflow"));
    }
}
