//! Steady-state status checks
//!
//! Each resource moves from `Watching` to `Succeeded`, `Failed` or
//! `TimedOut`. The check for a resource is picked by kind:
//! - Deployments, StatefulSets, DaemonSets: `kubectl rollout status`
//! - DeploymentConfigs: `oc rollout status`
//! - Jobs: poll the Complete/Failed conditions
//! - Managed custom resources: poll the object and evaluate its
//!   steady-state condition expression
//!
//! Resources are checked one after the other and the first failure stops the
//! batch. Event watchers run alongside for diagnostics only.

mod custom;
pub mod events;
mod job;
mod workload;

pub use custom::CustomResourceCheck;
pub use events::EventWatchers;
pub use job::JobStatusCheck;
pub use workload::{DeploymentConfigCheck, RolloutStatusCheck};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use kdeploy_core::manifest::check_steady_state_condition;
use kdeploy_core::{CommandStatus, KubernetesResource, KubernetesResourceId};
use kdeploy_engine::ExpressionEvaluator;

use crate::error::{KubeError, Result};
use crate::explanation;
use crate::orchestrator::Orchestrator;
use crate::retry::RetryPolicy;
use events::{name_width, watch_namespaces, with_event_forwarding};

/// Lifecycle of one resource under check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteadyState {
    Watching,
    Succeeded,
    Failed,
    TimedOut,
}

impl SteadyState {
    pub fn is_success(&self) -> bool {
        matches!(self, SteadyState::Succeeded)
    }
}

impl fmt::Display for SteadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SteadyState::Watching => "Watching",
            SteadyState::Succeeded => "Succeeded",
            SteadyState::Failed => "Failed",
            SteadyState::TimedOut => "TimedOut",
        };
        write!(f, "{s}")
    }
}

/// What a check needs from the surrounding batch
pub struct CheckContext<'a> {
    pub orchestrator: Orchestrator<'a>,
    /// Column width of resource names in status lines
    pub name_width: usize,
}

/// Per-kind steady-state detection
#[async_trait]
pub trait SteadyStateCheck: Send + Sync {
    /// Watch one resource until it settles; never returns `Watching`
    async fn check(&self, id: &KubernetesResourceId, ctx: &CheckContext<'_>) -> Result<SteadyState>;
}

/// Check used for a workload kind
pub fn check_for(kind: &str, job_poll_interval: Duration) -> Box<dyn SteadyStateCheck> {
    match kind {
        "Job" => Box::new(JobStatusCheck {
            poll_interval: job_poll_interval,
        }),
        "DeploymentConfig" => Box::new(DeploymentConfigCheck),
        _ => Box::new(RolloutStatusCheck),
    }
}

/// Runs the checks of a deployment
pub struct StatusChecker<'a> {
    orchestrator: Orchestrator<'a>,
    evaluator: &'a ExpressionEvaluator,
    timeout: Duration,
    job_poll_interval: Duration,
    custom_poll_interval: Duration,
    retry: RetryPolicy,
}

impl<'a> StatusChecker<'a> {
    pub fn new(orchestrator: Orchestrator<'a>, evaluator: &'a ExpressionEvaluator) -> Self {
        Self {
            orchestrator,
            evaluator,
            timeout: kdeploy_core::annotations::DEFAULT_TIMEOUT,
            job_poll_interval: Duration::from_secs(5),
            custom_poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    /// Deadline of each workload check
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_intervals(mut self, job: Duration, custom: Duration) -> Self {
        self.job_poll_interval = job;
        self.custom_poll_interval = custom;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn start_watchers(&self, namespaces: &[String]) -> EventWatchers {
        let kubectl = self.orchestrator.kubectl();
        for namespace in namespaces {
            self.orchestrator
                .log
                .info(&format!("{}\n", kubectl.watch_events(namespace).printable()));
        }
        EventWatchers::start(self.orchestrator.runner, &kubectl, namespaces).await
    }

    fn fail_namespace(&self, namespace: &str) {
        self.orchestrator.log.finish(
            CommandStatus::Failure,
            &format!("\nStatus check for resources in namespace [{namespace}] failed."),
        );
    }

    /// Check workloads in order, stopping at the first that does not settle
    pub async fn check_all_resources(
        &self,
        resource_ids: &[KubernetesResourceId],
        namespace: &str,
        denote_overall_success: bool,
    ) -> Result<()> {
        if resource_ids.is_empty() {
            return Ok(());
        }

        let namespaces = watch_namespaces(
            resource_ids.iter().map(|id| id.namespace.as_str()),
            namespace,
        );
        let mut watchers = self.start_watchers(&namespaces).await;
        let log = self.orchestrator.log;
        let ctx = CheckContext {
            orchestrator: self.orchestrator,
            name_width: name_width(resource_ids.iter().map(|id| id.name.as_str())),
        };

        let forwarder = watchers.forwarder(resource_ids, namespace, log);
        let outcome = with_event_forwarding(forwarder, async {
            for id in resource_ids {
                let check = check_for(&id.kind, self.job_poll_interval);
                let state = match tokio::time::timeout(self.timeout, check.check(id, &ctx)).await {
                    Ok(state) => state?,
                    Err(_) => SteadyState::TimedOut,
                };
                tracing::debug!(resource = %id, %state, "status check finished");

                if !state.is_success() {
                    return Err(KubeError::from(explanation::steady_state_failed(
                        namespace,
                        format!("{} finished in state {state}", id.kind_name_ref()),
                    )));
                }
            }
            Ok::<(), KubeError>(())
        })
        .await;

        watchers.kill_all().await;

        match outcome {
            Ok(()) => {
                if denote_overall_success {
                    log.finish(CommandStatus::Success, "\nDone.");
                }
                Ok(())
            }
            Err(e) => {
                self.fail_namespace(namespace);
                Err(e)
            }
        }
    }

    /// Check managed custom resources against their steady-state conditions
    ///
    /// Each resource gets the whole `timeout`.
    pub async fn check_all_custom_resources(
        &self,
        resources: &[KubernetesResource],
        timeout: Duration,
    ) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        check_steady_state_condition(resources)?;

        let log = self.orchestrator.log;
        log.info("Performing steady check for managed workloads \n");

        let namespace = resources[0].namespace();
        let ids: Vec<KubernetesResourceId> =
            resources.iter().map(|r| r.resource_id.clone()).collect();
        let namespaces = watch_namespaces(ids.iter().map(|id| id.namespace.as_str()), namespace);
        let mut watchers = self.start_watchers(&namespaces).await;
        let ctx = CheckContext {
            orchestrator: self.orchestrator,
            name_width: name_width(ids.iter().map(|id| id.name.as_str())),
        };

        let forwarder = watchers.forwarder(&ids, namespace, log);
        let outcome = with_event_forwarding(forwarder, async {
            for resource in resources {
                let condition = resource.steady_state_condition().unwrap_or_default();
                let check = CustomResourceCheck {
                    poll_interval: self.custom_poll_interval,
                    retry: self.retry,
                    ..CustomResourceCheck::new(condition, self.evaluator)
                };

                let detail = match tokio::time::timeout(timeout, check.check(&resource.resource_id, &ctx)).await {
                    Ok(Ok(state)) if state.is_success() => continue,
                    Ok(Ok(state)) => format!("{} finished in state {state}", resource.resource_id),
                    Ok(Err(e)) => match e.explanation() {
                        Some(explanation) => format!("{e}: {explanation}"),
                        None => e.to_string(),
                    },
                    Err(_) => format!(
                        "{} did not reach steady state within {timeout:?}",
                        resource.resource_id
                    ),
                };

                log.error("\nFailed to execute the status check of the custom resources.");
                log.warn(&format!(
                    "\nPossible reasons: \n\t 1. The steady check condition [{condition}] is wrong. \n\t 2. The custom controller is not running."
                ));
                return Err(KubeError::from(explanation::custom_resource_failed(
                    condition, detail,
                )));
            }
            Ok::<(), KubeError>(())
        })
        .await;

        watchers.kill_all().await;

        match outcome {
            Ok(()) => {
                log.finish(CommandStatus::Success, "\nDone.");
                Ok(())
            }
            Err(e) => {
                self.fail_namespace(namespace);
                Err(e)
            }
        }
    }
}
