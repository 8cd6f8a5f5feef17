//! Apply, delete and scale through kubectl
//!
//! Every mutation writes the manifests it sends into the task working
//! directory, runs the CLI with its output streamed into the execution log,
//! and closes the command unit with `Done.` or `Failed.`.

use std::path::Path;

use kdeploy_core::manifest::resources_to_manifest;
use kdeploy_core::{
    CommandLine, CommandRunner, CommandStatus, ExecutionLog, HintedError, KubernetesResource,
    KubernetesResourceId, OutputLine, ProcessOutput, ToolPaths,
};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::explanation;
use crate::kubectl::{Kubectl, parse_latest_revision};

/// Manifests applied, deleted and described
pub const MANIFEST_FILE: &str = "manifests.yaml";
/// Manifests validated by the dry run
pub const DRY_RUN_MANIFEST_FILE: &str = "manifests-dry-run.yaml";

/// Shared handles for every cluster operation of one task
#[derive(Clone, Copy)]
pub struct Orchestrator<'a> {
    pub runner: &'a dyn CommandRunner,
    pub tools: &'a ToolPaths,
    pub log: &'a dyn ExecutionLog,
    pub working_dir: &'a Path,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        tools: &'a ToolPaths,
        log: &'a dyn ExecutionLog,
        working_dir: &'a Path,
    ) -> Self {
        Self {
            runner,
            tools,
            log,
            working_dir,
        }
    }

    pub fn kubectl(&self) -> Kubectl {
        Kubectl::new(self.tools).in_dir(self.working_dir)
    }

    /// Run with stdout as info lines and stderr as error lines
    pub async fn execute_logged(&self, command: &CommandLine) -> Result<ProcessOutput> {
        let log = self.log;
        let sink = |line: &OutputLine| {
            if line.is_stderr() {
                log.error(line.text());
            } else {
                log.info(line.text());
            }
        };
        Ok(self.runner.execute(command, Some(&sink)).await?)
    }

    fn write_manifests(&self, file: &str, resources: &[KubernetesResource]) -> Result<()> {
        std::fs::write(self.working_dir.join(file), resources_to_manifest(resources))?;
        Ok(())
    }

    /// `kubectl apply -f manifests.yaml`
    ///
    /// `--record` is added unless a resource already carries a change cause.
    pub async fn apply_manifests(
        &self,
        resources: &[KubernetesResource],
        denote_overall_success: bool,
    ) -> Result<()> {
        self.write_manifests(MANIFEST_FILE, resources)?;

        let record = !resources.iter().any(KubernetesResource::has_change_cause);
        let command = Kubectl::for_resources(self.tools, resources)
            .in_dir(self.working_dir)
            .apply(MANIFEST_FILE, record);
        self.log.info(&format!("\n{}\n", command.printable()));

        let output = self.execute_logged(&command).await?;
        if !output.is_success() {
            error!(
                "Failed. Process terminated with exit value: [{}] and output: [{}]",
                output.exit_code,
                output.combined()
            );
            self.log.finish(CommandStatus::Failure, "\nFailed.");
            return Err(explanation::apply_failed(&command, &output).into());
        }

        if denote_overall_success {
            self.log.finish(CommandStatus::Success, "\nDone.");
        }
        Ok(())
    }

    /// Client-side validation of the manifests without touching the cluster
    pub async fn dry_run_manifests(
        &self,
        resources: &[KubernetesResource],
        use_new_kubectl: bool,
    ) -> Result<()> {
        self.log.info("\nValidating manifests with Dry Run");
        self.write_manifests(DRY_RUN_MANIFEST_FILE, resources)?;

        let command = Kubectl::for_resources(self.tools, resources)
            .in_dir(self.working_dir)
            .apply_dry_run(DRY_RUN_MANIFEST_FILE, use_new_kubectl);
        self.log.info(&format!("\n{}\n", command.printable()));

        let output = self.execute_logged(&command).await?;
        if !output.is_success() {
            self.log.finish(CommandStatus::Failure, "\nFailed.");
            return Err(explanation::dry_run_failed(&command, &output).into());
        }

        self.log.finish(CommandStatus::Success, "\nDone.");
        Ok(())
    }

    /// `kubectl scale`; `false` when the CLI fails
    pub async fn scale(&self, resource_id: &KubernetesResourceId, target_replicas: u32) -> Result<bool> {
        self.log
            .info(&format!("\nScaling {}", resource_id.kind_name_ref()));

        let command = self.kubectl().scale(resource_id, target_replicas);
        let output = self.execute_logged(&command).await?;

        if output.is_success() {
            self.log.finish(CommandStatus::Success, "\nDone.");
            Ok(true)
        } else {
            self.log.finish(CommandStatus::Failure, "\nFailed.");
            self.log.warn(&format!(
                "Failed to scale workload. Error {}. {}",
                output.combined(),
                explanation::SCALE_FAILED_HINT
            ));
            warn!(resource = %resource_id, exit_code = output.exit_code, "scale failed");
            Ok(false)
        }
    }

    /// Delete every resource in order
    ///
    /// A resource that is already gone does not count as a failure. Any other
    /// failed delete is logged, the remaining ids are still attempted, and the
    /// first such failure is returned once all deletes have run.
    pub async fn delete(
        &self,
        resource_ids: &[KubernetesResourceId],
        denote_overall_success: bool,
    ) -> Result<()> {
        let kubectl = self.kubectl();
        let mut first_failure = None;

        for id in resource_ids {
            let command = kubectl.delete(id);
            self.log.info(&format!("\n{}", command.printable()));

            let output = self.execute_logged(&command).await?;
            if output.is_success() {
                continue;
            }
            if output.combined().to_lowercase().contains("not found") {
                debug!(resource = %id, "already deleted");
                continue;
            }
            warn!(resource = %id, exit_code = output.exit_code, "delete failed");
            if first_failure.is_none() {
                first_failure = Some(HintedError::new(
                    format!("Failed to delete {}", id.kind_name_ref()),
                    "Check that the resource exists and the user may delete it",
                    explanation::process_failure(&command, &output),
                ));
            }
        }

        if let Some(failure) = first_failure {
            self.log.finish(CommandStatus::Failure, "\nFailed.");
            return Err(failure.into());
        }
        if denote_overall_success {
            self.log.finish(CommandStatus::Success, "\nDone.");
        }
        Ok(())
    }

    /// `kubectl delete -f manifests.yaml`; failures are only warned about
    pub async fn delete_manifests(&self, resources: &[KubernetesResource]) -> Result<()> {
        self.write_manifests(MANIFEST_FILE, resources)?;

        let command = Kubectl::for_resources(self.tools, resources)
            .in_dir(self.working_dir)
            .delete_file(MANIFEST_FILE);
        self.log.info(&format!("\n{}\n", command.printable()));

        let output = self.execute_logged(&command).await?;
        if !output.is_success() {
            warn!(exit_code = output.exit_code, output = %output.combined(), "delete of manifests failed");
            self.log
                .warn(&format!("Failed to delete manifests. Error {}", output.combined()));
        }

        self.log.finish(CommandStatus::Success, "\nDone.");
        Ok(())
    }

    /// Try every delete and return the ids that were deleted
    pub async fn execute_delete_handling_partial_execution(
        &self,
        resource_ids: &[KubernetesResourceId],
        denote_overall_success: bool,
    ) -> Result<Vec<KubernetesResourceId>> {
        let kubectl = self.kubectl();
        let mut deleted = Vec::with_capacity(resource_ids.len());

        for id in resource_ids {
            let command = kubectl.delete(id);
            self.log.info(&format!("\n{}", command.printable()));

            match self.execute_logged(&command).await {
                Ok(output) if output.is_success() => deleted.push(id.clone()),
                Ok(output) => self.log.warn(&format!(
                    "Failed to delete resource {}. Error {}",
                    id.kind_name_ref(),
                    output.combined()
                )),
                Err(e) => self.log.warn(&format!(
                    "Failed to delete resource {}. Error {}",
                    id.kind_name_ref(),
                    e
                )),
            }
        }

        if denote_overall_success {
            self.log.finish(CommandStatus::Success, "\nDone.");
        }
        Ok(deleted)
    }

    /// `spec.replicas` of a workload; `None` when blank or unreadable
    pub async fn current_replicas(&self, resource_id: &KubernetesResourceId) -> Result<Option<u32>> {
        let command = self.kubectl().get_jsonpath(resource_id, "{$.spec.replicas}");
        let output = self.runner.execute_silent(&command).await?;
        if !output.is_success() {
            debug!(resource = %resource_id, output = %output.combined(), "replicas not readable");
            return Ok(None);
        }
        Ok(output.stdout.trim().parse().ok())
    }

    /// Latest rollout revision; `oc` for DeploymentConfigs
    pub async fn latest_revision(&self, resource_id: &KubernetesResourceId) -> Result<Option<String>> {
        let client = if resource_id.kind == "DeploymentConfig" {
            Kubectl::oc(self.tools)
        } else {
            Kubectl::new(self.tools)
        };
        let command = client.in_dir(self.working_dir).rollout_history(resource_id);

        let output = self.runner.execute_silent(&command).await?;
        if !output.is_success() {
            debug!(resource = %resource_id, output = %output.combined(), "rollout history failed");
            return Ok(None);
        }
        Ok(parse_latest_revision(&output.stdout))
    }

    /// `kubectl describe -f manifests.yaml`
    pub async fn describe(&self) -> Result<()> {
        let command = self.kubectl().describe_file(MANIFEST_FILE);
        self.log.info(&format!("\n{}\n", command.printable()));

        let output = self.execute_logged(&command).await?;
        if !output.is_success() {
            self.log
                .warn(&format!("Failed to describe resources. Error {}", output.combined()));
        }
        Ok(())
    }
}

/// Instances a canary phase targets: `percent` of `max_instances`, at least one
pub fn target_instances_for_canary(
    percent: u32,
    max_instances: u32,
    log: &dyn ExecutionLog,
) -> u32 {
    let target = (f64::from(percent) * f64::from(max_instances) / 100.0).round() as u32;
    if target < 1 {
        log.info("\nTarget instances computed to be less than 1. Bumped up to 1");
        1
    } else {
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdeploy_core::manifest::read_manifests;
    use kdeploy_core::{FileData, LogLevel, MemoryLog, MockRunner};

    const MANIFEST: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: web-config-3
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
"#;

    struct Fixture {
        dir: tempfile::TempDir,
        runner: MockRunner,
        tools: ToolPaths,
        log: MemoryLog,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                runner: MockRunner::new(),
                tools: ToolPaths::default(),
                log: MemoryLog::new(),
            }
        }

        fn orchestrator(&self) -> Orchestrator<'_> {
            Orchestrator::new(&self.runner, &self.tools, &self.log, self.dir.path())
        }
    }

    fn resources(manifest: &str) -> Vec<KubernetesResource> {
        read_manifests(&[FileData::new("app.yaml", manifest)]).unwrap()
    }

    fn ids(names: &[&str]) -> Vec<KubernetesResourceId> {
        names
            .iter()
            .map(|n| KubernetesResourceId::new("Deployment", *n, "prod"))
            .collect()
    }

    #[tokio::test]
    async fn test_apply_writes_manifests_and_records() {
        let fx = Fixture::new();
        fx.runner.respond(
            "apply",
            ProcessOutput::success("configmap/web-config-3 created\ndeployment.apps/web created"),
        );

        fx.orchestrator()
            .apply_manifests(&resources(MANIFEST), true)
            .await
            .unwrap();

        let written = std::fs::read_to_string(fx.dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(written.contains("kind: Deployment"));
        insta::assert_snapshot!(
            fx.runner.printed_invocations()[0],
            @"kubectl apply -f manifests.yaml --record"
        );
        assert!(fx.log.contains("deployment.apps/web created"));
        assert_eq!(fx.log.status(), Some(CommandStatus::Success));
    }

    #[tokio::test]
    async fn test_apply_skips_record_with_change_cause() {
        let fx = Fixture::new();
        let manifest = "kind: Deployment\nmetadata:\n  name: web\n  annotations:\n    kubernetes.io/change-cause: bump image\n";

        fx.orchestrator()
            .apply_manifests(&resources(manifest), false)
            .await
            .unwrap();

        assert_eq!(
            fx.runner.printed_invocations(),
            vec!["kubectl apply -f manifests.yaml"]
        );
        assert!(fx.log.status().is_none());
    }

    #[tokio::test]
    async fn test_apply_failure_is_structured() {
        let fx = Fixture::new();
        fx.runner.fail_on("apply", 1, "error: unable to recognize");

        let err = fx
            .orchestrator()
            .apply_manifests(&resources(MANIFEST), true)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), explanation::APPLY_FAILED);
        assert!(err.explanation().unwrap().contains("error: unable to recognize"));
        assert!(err.explanation().unwrap().contains("exited with value [1]"));
        assert_eq!(fx.log.status(), Some(CommandStatus::Failure));
        assert!(fx.log.lines_at(LogLevel::Error).contains(&"\nFailed.".to_string()));
    }

    #[tokio::test]
    async fn test_dry_run_flags() {
        let fx = Fixture::new();
        let orchestrator = fx.orchestrator();
        orchestrator.dry_run_manifests(&resources(MANIFEST), true).await.unwrap();
        orchestrator.dry_run_manifests(&resources(MANIFEST), false).await.unwrap();

        assert!(fx.dir.path().join(DRY_RUN_MANIFEST_FILE).exists());
        assert_eq!(
            fx.runner.printed_invocations(),
            vec![
                "kubectl apply -f manifests-dry-run.yaml --dry-run=client",
                "kubectl apply -f manifests-dry-run.yaml --dry-run",
            ]
        );
        assert!(fx.log.contains("Validating manifests with Dry Run"));
    }

    #[tokio::test]
    async fn test_dry_run_failure() {
        let fx = Fixture::new();
        fx.runner.fail_on("--dry-run", 1, "invalid");
        let err = fx
            .orchestrator()
            .dry_run_manifests(&resources(MANIFEST), true)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), explanation::DRY_RUN_FAILED);
    }

    #[tokio::test]
    async fn test_scale_reports_outcome() {
        let fx = Fixture::new();
        fx.runner.fail_on("scale Deployment/broken", 1, "not found");
        let orchestrator = fx.orchestrator();

        let id = KubernetesResourceId::new("Deployment", "web", "prod");
        assert!(orchestrator.scale(&id, 3).await.unwrap());
        insta::assert_snapshot!(
            fx.runner.printed_invocations()[0],
            @"kubectl scale Deployment/web --replicas=3 --namespace=prod"
        );

        let broken = KubernetesResourceId::new("Deployment", "broken", "prod");
        assert!(!orchestrator.scale(&broken, 3).await.unwrap());
        assert_eq!(fx.log.status(), Some(CommandStatus::Failure));
        assert_eq!(fx.runner.count_matching("scale"), 2);
    }

    #[tokio::test]
    async fn test_delete_attempts_every_resource() {
        let fx = Fixture::new();
        fx.runner.fail_on("delete Deployment/b", 1, "forbidden");

        let err = fx
            .orchestrator()
            .delete(&ids(&["a", "b", "c"]), true)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Failed to delete Deployment/b");
        assert_eq!(fx.runner.count_matching("delete"), 3);
        assert_eq!(fx.log.status(), Some(CommandStatus::Failure));
    }

    #[tokio::test]
    async fn test_delete_ignores_missing_resources() {
        let fx = Fixture::new();
        fx.runner.fail_on(
            "delete Deployment/b",
            1,
            "Error from server (NotFound): deployments \"b\" not found",
        );

        fx.orchestrator()
            .delete(&ids(&["a", "b", "c"]), true)
            .await
            .unwrap();

        assert_eq!(fx.runner.count_matching("delete"), 3);
        assert_eq!(fx.log.status(), Some(CommandStatus::Success));
    }

    #[tokio::test]
    async fn test_partial_delete_returns_succeeded() {
        let fx = Fixture::new();
        fx.runner.fail_on("delete Deployment/b", 1, "forbidden");

        let deleted = fx
            .orchestrator()
            .execute_delete_handling_partial_execution(&ids(&["a", "b", "c"]), true)
            .await
            .unwrap();

        assert_eq!(deleted, ids(&["a", "c"]));
        assert_eq!(fx.runner.count_matching("delete"), 3);
        assert!(fx.log.contains("Failed to delete resource Deployment/b. Error forbidden"));
        assert_eq!(fx.log.status(), Some(CommandStatus::Success));
    }

    #[tokio::test]
    async fn test_delete_manifests_never_fails() {
        let fx = Fixture::new();
        fx.runner.fail_on("delete -f", 1, "not found");

        fx.orchestrator()
            .delete_manifests(&resources(MANIFEST))
            .await
            .unwrap();

        assert!(fx.log.contains("Failed to delete manifests"));
        assert!(fx.log.lines().last().unwrap().contains("Done."));
    }

    #[tokio::test]
    async fn test_current_replicas() {
        let fx = Fixture::new();
        fx.runner.respond("Deployment/web", ProcessOutput::success("3"));
        fx.runner.respond("Deployment/blank", ProcessOutput::success("  "));
        fx.runner.fail_on("Deployment/gone", 1, "NotFound");
        let orchestrator = fx.orchestrator();

        let get = |name: &str| KubernetesResourceId::new("Deployment", name, "prod");
        assert_eq!(orchestrator.current_replicas(&get("web")).await.unwrap(), Some(3));
        assert_eq!(orchestrator.current_replicas(&get("blank")).await.unwrap(), None);
        assert_eq!(orchestrator.current_replicas(&get("gone")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_revision_uses_oc_for_deployment_configs() {
        let fx = Fixture::new();
        fx.runner.respond(
            "rollout history",
            ProcessOutput::success("REVISION\tSTATUS\n1\tComplete\n2\tComplete\n"),
        );
        let orchestrator = fx.orchestrator();

        let dc = KubernetesResourceId::new("DeploymentConfig", "web", "prod");
        assert_eq!(
            orchestrator.latest_revision(&dc).await.unwrap().as_deref(),
            Some("2")
        );
        insta::assert_snapshot!(
            fx.runner.printed_invocations()[0],
            @"oc rollout history DeploymentConfig/web --namespace=prod"
        );
    }

    #[test]
    fn test_target_instances_for_canary() {
        let log = MemoryLog::new();
        assert_eq!(target_instances_for_canary(50, 4, &log), 2);
        assert_eq!(target_instances_for_canary(25, 10, &log), 3);
        assert!(!log.contains("Bumped up to 1"));

        assert_eq!(target_instances_for_canary(10, 2, &log), 1);
        assert!(log.contains("Target instances computed to be less than 1. Bumped up to 1"));
    }
}
