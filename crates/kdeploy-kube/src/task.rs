//! Deploy task coordination
//!
//! [`DeployTask::execute`] runs one deployment end to end: fetch, render,
//! parse, validate, apply, wait for steady state, then prune on success or
//! clean up on failure. The release history is persisted on every path once
//! the new release has been created.

use std::path::Path;
use std::time::Duration;

use kdeploy_core::annotations::timeout_from_minutes;
use kdeploy_core::kind::is_rollout_workload;
use kdeploy_core::manifest::{
    check_steady_state_condition, read_manifests, resources_in_table_format,
    set_namespace_if_required,
};
use kdeploy_core::{
    CommandRunner, CommandStatus, ExecutionLog, KubernetesResource, KubernetesResourceId,
    ReleaseHistory, ReleaseStatus, ToolPaths,
};
use kdeploy_engine::{ExpressionEvaluator, ManifestDelegateConfig, ManifestFetcher, RenderContext, render_template};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::prune::{cleanup, prune};
use crate::status::StatusChecker;
use crate::storage::ReleaseHistoryStore;

fn default_true() -> bool {
    true
}

fn default_timeout() -> Duration {
    kdeploy_core::annotations::DEFAULT_TIMEOUT
}

/// `timeout` is either a humantime string (`10m`) or whole minutes, where a
/// non-positive count means the default
fn deserialize_timeout<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timeout {
        Minutes(i64),
        Text(String),
    }

    match Timeout::deserialize(deserializer)? {
        Timeout::Minutes(minutes) => Ok(timeout_from_minutes(Some(minutes))),
        Timeout::Text(text) => humantime_serde::re::humantime::parse_duration(&text)
            .map_err(serde::de::Error::custom),
    }
}

/// One deployment of a release
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub release_name: String,
    /// Namespace given to resources that declare none
    pub namespace: String,
    pub manifest: ManifestDelegateConfig,
    /// Values files (or kustomize patches), raw YAML
    #[serde(default)]
    pub overrides: Vec<String>,
    #[serde(default)]
    pub skip_dry_run: bool,
    #[serde(default)]
    pub skip_steady_state_check: bool,
    /// Delete resources dropped since the last successful release
    #[serde(default = "default_true")]
    pub prune: bool,
    /// Store the history in a Secret instead of a ConfigMap
    #[serde(default = "default_true")]
    pub prefer_secret: bool,
    /// Render command timeout and per-resource steady-state deadline
    #[serde(
        default = "default_timeout",
        serialize_with = "humantime_serde::serialize",
        deserialize_with = "deserialize_timeout"
    )]
    pub timeout: Duration,
}

impl DeployRequest {
    pub fn new(
        release_name: impl Into<String>,
        namespace: impl Into<String>,
        manifest: ManifestDelegateConfig,
    ) -> Self {
        Self {
            release_name: release_name.into(),
            namespace: namespace.into(),
            manifest,
            overrides: Vec::new(),
            skip_dry_run: false,
            skip_steady_state_check: false,
            prune: true,
            prefer_secret: true,
            timeout: default_timeout(),
        }
    }
}

/// Outcome of a successful deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub release_number: u32,
    pub status: ReleaseStatus,
    pub resources: Vec<KubernetesResourceId>,
    pub pruned: Vec<KubernetesResourceId>,
}

/// Fetch and render the manifests of a request into `working_dir`
///
/// Returns the parsed resources in creation order, with the request
/// namespace filled in where a resource declares none.
pub async fn prepare_resources(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    fetcher: &ManifestFetcher,
    log: &dyn ExecutionLog,
    request: &DeployRequest,
    working_dir: &Path,
) -> Result<Vec<KubernetesResource>> {
    let manifest_dir = working_dir.join("manifest-files");
    std::fs::create_dir_all(&manifest_dir)?;

    log.info("Fetching manifest files");
    fetcher
        .fetch_manifest_files(&request.manifest, &manifest_dir, log)
        .await?;

    let ctx = RenderContext {
        manifest_dir: &manifest_dir,
        working_dir,
        overrides: &request.overrides,
        release_name: &request.release_name,
        namespace: &request.namespace,
        tools,
        runner,
        log,
        timeout: request.timeout,
    };
    let files = render_template(&request.manifest, &ctx).await?;

    let mut resources = read_manifests(&files)?;
    set_namespace_if_required(&mut resources, &request.namespace)?;
    log.info(&format!(
        "\nManifests processed. Found following resources: \n{}",
        resources_in_table_format(&resources)
    ));
    Ok(resources)
}

/// Collaborators of one deployment
pub struct DeployTask<'a> {
    pub runner: &'a dyn CommandRunner,
    pub tools: &'a ToolPaths,
    pub fetcher: &'a ManifestFetcher,
    pub store: &'a dyn ReleaseHistoryStore,
    pub log: &'a dyn ExecutionLog,
}

impl<'a> DeployTask<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        tools: &'a ToolPaths,
        fetcher: &'a ManifestFetcher,
        store: &'a dyn ReleaseHistoryStore,
        log: &'a dyn ExecutionLog,
    ) -> Self {
        Self {
            runner,
            tools,
            fetcher,
            store,
            log,
        }
    }

    /// Run one deployment
    ///
    /// A failed deployment returns its error after the history recorded the
    /// release as failed.
    pub async fn execute(&self, request: &DeployRequest) -> Result<DeployResponse> {
        let scratch = tempfile::Builder::new().prefix("kdeploy-").tempdir()?;
        let working_dir = scratch.path();
        info!(release = %request.release_name, namespace = %request.namespace, "deploy started");

        let resources = prepare_resources(
            self.runner,
            self.tools,
            self.fetcher,
            self.log,
            request,
            working_dir,
        )
        .await
        .inspect_err(|e| {
            self.log.finish(CommandStatus::Failure, &format!("\nFailed. {e}"));
        })?;

        let managed: Vec<KubernetesResource> = resources
            .iter()
            .filter(|r| r.is_managed_workload())
            .cloned()
            .collect();
        check_steady_state_condition(&managed).inspect_err(|e| {
            self.log.finish(CommandStatus::Failure, &format!("\nFailed. {e}"));
        })?;

        let orchestrator = Orchestrator::new(self.runner, self.tools, self.log, working_dir);
        if !request.skip_dry_run {
            orchestrator
                .dry_run_manifests(&resources, self.tools.use_new_kubectl)
                .await?;
        }

        let mut history = self.store.load(&request.release_name).await?;
        let release_number = {
            let release = history.create_new_release();
            release.record_resources(&resources);
            release.number
        };
        self.log
            .info(&format!("\nCurrent release number is: {release_number}"));

        let outcome = self
            .apply_and_wait(&orchestrator, request, &resources, &managed)
            .await;

        let (status, pruned) = match &outcome {
            Ok(()) => {
                let pruned = if request.prune {
                    self.prune_quietly(&orchestrator, &history, &resources).await
                } else {
                    Vec::new()
                };
                history.set_latest_status(ReleaseStatus::Succeeded);
                (ReleaseStatus::Succeeded, pruned)
            }
            Err(e) => {
                warn!(release = %request.release_name, error = %e, "deploy failed");
                if let Err(cleanup_error) = cleanup(&orchestrator, &mut history).await {
                    self.log
                        .warn(&format!("Failed to clean up older releases: {cleanup_error}"));
                }
                history.set_latest_status(ReleaseStatus::Failed);
                (ReleaseStatus::Failed, Vec::new())
            }
        };

        let saved = self.save_history(request, &history).await;
        outcome?;
        saved?;

        debug!(release = release_number, %status, "deploy finished");
        Ok(DeployResponse {
            release_number,
            status,
            resources: resources.iter().map(|r| r.resource_id.clone()).collect(),
            pruned,
        })
    }

    async fn apply_and_wait(
        &self,
        orchestrator: &Orchestrator<'_>,
        request: &DeployRequest,
        resources: &[KubernetesResource],
        managed: &[KubernetesResource],
    ) -> Result<()> {
        orchestrator.apply_manifests(resources, true).await?;

        if request.skip_steady_state_check {
            self.log.info("\nSkipping status check");
            return Ok(());
        }

        let evaluator = ExpressionEvaluator::new();
        let checker = StatusChecker::new(*orchestrator, &evaluator).with_timeout(request.timeout);

        let workloads: Vec<KubernetesResourceId> = resources
            .iter()
            .filter(|r| !r.is_managed_workload() && !r.is_direct_apply())
            .filter(|r| is_rollout_workload(r.kind()) || r.kind() == "Job")
            .map(|r| r.resource_id.clone())
            .collect();

        checker
            .check_all_resources(&workloads, &request.namespace, managed.is_empty())
            .await?;
        checker
            .check_all_custom_resources(managed, request.timeout)
            .await
    }

    /// Prune failures never fail a successful deployment
    async fn prune_quietly(
        &self,
        orchestrator: &Orchestrator<'_>,
        history: &ReleaseHistory,
        resources: &[KubernetesResource],
    ) -> Vec<KubernetesResourceId> {
        match prune(orchestrator, history, resources).await {
            Ok(pruned) => pruned,
            Err(e) => {
                self.log.warn(&format!("Failed to prune resources: {e}"));
                Vec::new()
            }
        }
    }

    async fn save_history(&self, request: &DeployRequest, history: &ReleaseHistory) -> Result<()> {
        self.store
            .save(&request.release_name, history, request.prefer_secret)
            .await
            .inspect_err(|e| {
                self.log
                    .error(&format!("Failed to save release history: {e}"));
            })
    }
}
