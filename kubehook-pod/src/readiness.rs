//! Pod readiness watching
//!
//! Turns the watch stream of a single pod into one terminal outcome:
//! - phase `Running` resolves ready
//! - phase `Failed` (or `Succeeded`, which an idling pod never reaches
//!   on purpose) resolves failed
//! - a container waiting in `ImagePullBackOff` or `CrashLoopBackOff`
//!   resolves failed right away, without waiting for the phase to follow
//! - otherwise the deadline resolves timed out
//!
//! The watch is dropped as soon as an outcome is known.

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::runtime::{WatchStreamExt, watcher};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

const REASON_IMAGE_PULL_BACKOFF: &str = "ImagePullBackOff";
const REASON_CRASH_LOOP_BACKOFF: &str = "CrashLoopBackOff";

/// Why a pod will never become ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The kubelet gave up pulling the image
    ImagePull(String),
    /// The container keeps exiting right after start
    CrashLoop(String),
    /// The pod reached phase `Failed`
    PodFailed,
    /// The pod ran to completion before anyone could exec into it
    PodExited,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ImagePull(message) => write!(f, "failed to pull image: {}", message),
            FailureReason::CrashLoop(message) => {
                write!(f, "image crashing on startup: {}", message)
            }
            FailureReason::PodFailed => f.write_str("pod failed"),
            FailureReason::PodExited => f.write_str("pod exited before becoming ready"),
        }
    }
}

/// Terminal result of waiting for a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready { node_name: Option<String> },
    Failed(FailureReason),
    TimedOut,
}

/// Watches the pod called `name` until it is ready, failed, or `timeout` passes
pub async fn wait_for_pod_ready(pods: Api<Pod>, name: &str, timeout: Duration) -> ReadinessOutcome {
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    let events = watcher(pods, config).default_backoff().applied_objects();

    await_readiness(name, events, timeout).await
}

/// Resolves the first terminal state seen on `events`, racing `timeout`
///
/// Stream errors are logged and skipped. If the stream ends without a
/// terminal state the wait resolves as timed out.
pub async fn await_readiness<S, E>(name: &str, events: S, timeout: Duration) -> ReadinessOutcome
where
    S: Stream<Item = Result<Pod, E>>,
    E: fmt::Display,
{
    let watch = async move {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(pod) => {
                    if let Some(outcome) = classify(&pod) {
                        return Some(outcome);
                    }
                }
                Err(e) => warn!("Watch error while waiting for pod {}: {}", name, e),
            }
        }
        None
    };

    let outcome = match tokio::time::timeout(timeout, watch).await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            warn!("Watch for pod {} ended before the pod settled", name);
            ReadinessOutcome::TimedOut
        }
        Err(_) => ReadinessOutcome::TimedOut,
    };

    match &outcome {
        ReadinessOutcome::Ready { node_name } => {
            debug!("Pod {} is running on node {:?}", name, node_name)
        }
        ReadinessOutcome::Failed(reason) => error!("Pod {} will not start: {}", name, reason),
        ReadinessOutcome::TimedOut => error!(
            "Pod {} not ready after {} seconds",
            name,
            timeout.as_secs()
        ),
    }

    outcome
}

/// Maps one observed pod state to an outcome, or `None` while it is still starting
pub fn classify(pod: &Pod) -> Option<ReadinessOutcome> {
    let status = pod.status.as_ref()?;

    debug!(
        "Pod {} phase {:?}",
        pod.metadata.name.as_deref().unwrap_or_default(),
        status.phase
    );

    for container in status.container_statuses.iter().flatten() {
        let Some(waiting) = container.state.as_ref().and_then(|s| s.waiting.as_ref()) else {
            continue;
        };
        let message = waiting.message.clone().unwrap_or_default();
        match waiting.reason.as_deref() {
            Some(REASON_IMAGE_PULL_BACKOFF) => {
                return Some(ReadinessOutcome::Failed(FailureReason::ImagePull(message)));
            }
            Some(REASON_CRASH_LOOP_BACKOFF) => {
                return Some(ReadinessOutcome::Failed(FailureReason::CrashLoop(message)));
            }
            _ => debug!(
                "Container {} waiting: {:?}",
                container.name, waiting.reason
            ),
        }
    }

    match status.phase.as_deref() {
        Some("Running") => Some(ReadinessOutcome::Ready {
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        }),
        Some("Failed") => Some(ReadinessOutcome::Failed(FailureReason::PodFailed)),
        Some("Succeeded") => Some(ReadinessOutcome::Failed(FailureReason::PodExited)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use tokio::time::Instant;

    fn pod(phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("runner-step-abcde".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-1".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    fn waiting_pod(reason: &str, message: &str) -> Pod {
        let mut pod = pod("Pending");
        pod.status.as_mut().unwrap().container_statuses = Some(vec![ContainerStatus {
            name: "job".to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    message: Some(message.to_string()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        pod
    }

    #[test]
    fn test_classify_phases() {
        assert_eq!(
            classify(&pod("Running")),
            Some(ReadinessOutcome::Ready {
                node_name: Some("node-1".to_string())
            })
        );
        assert_eq!(
            classify(&pod("Failed")),
            Some(ReadinessOutcome::Failed(FailureReason::PodFailed))
        );
        assert_eq!(classify(&pod("Pending")), None);
        assert_eq!(classify(&Pod::default()), None);
    }

    #[test]
    fn test_classify_fast_fail_reasons() {
        assert_eq!(
            classify(&waiting_pod("ImagePullBackOff", "manifest unknown")),
            Some(ReadinessOutcome::Failed(FailureReason::ImagePull(
                "manifest unknown".to_string()
            )))
        );
        assert_eq!(
            classify(&waiting_pod("CrashLoopBackOff", "back-off restarting")),
            Some(ReadinessOutcome::Failed(FailureReason::CrashLoop(
                "back-off restarting".to_string()
            )))
        );
        assert_eq!(classify(&waiting_pod("ContainerCreating", "")), None);
    }

    #[test]
    fn test_failure_messages() {
        assert!(
            FailureReason::ImagePull("denied".to_string())
                .to_string()
                .contains("failed to pull image")
        );
        assert_eq!(
            FailureReason::CrashLoop("oops".to_string()).to_string(),
            "image crashing on startup: oops"
        );
        assert_eq!(FailureReason::PodFailed.to_string(), "pod failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_pull_backoff_fails_before_timeout() {
        let timeout = Duration::from_secs(600);
        let events = stream::iter(vec![
            Ok::<_, String>(pod("Pending")),
            Ok(waiting_pod("ImagePullBackOff", "pull access denied")),
        ])
        .chain(stream::pending());

        let started = Instant::now();
        let outcome = await_readiness("runner-step-abcde", events, timeout).await;

        match outcome {
            ReadinessOutcome::Failed(reason) => {
                assert!(reason.to_string().contains("failed to pull image"))
            }
            other => panic!("expected image pull failure, got {:?}", other),
        }
        assert!(started.elapsed() < timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_times_out() {
        let timeout = Duration::from_secs(600);
        let events = stream::pending::<Result<Pod, String>>();

        let started = Instant::now();
        let outcome = await_readiness("runner-workflow", events, timeout).await;

        assert_eq!(outcome, ReadinessOutcome::TimedOut);
        assert!(started.elapsed() >= timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_terminal_event_wins() {
        let events = stream::iter(vec![
            Err("connection reset".to_string()),
            Ok(pod("Pending")),
            Ok(pod("Running")),
            Ok(pod("Failed")),
        ]);

        let outcome = await_readiness("runner-workflow", events, Duration::from_secs(10)).await;
        assert_eq!(
            outcome,
            ReadinessOutcome::Ready {
                node_name: Some("node-1".to_string())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_stream_resolves_timed_out() {
        let events = stream::iter(vec![Ok::<_, String>(pod("Pending"))]);
        let outcome = await_readiness("runner-workflow", events, Duration::from_secs(10)).await;
        assert_eq!(outcome, ReadinessOutcome::TimedOut);
    }
}
