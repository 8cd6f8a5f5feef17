//! Pruning of dropped resources and cleanup of stale releases
//!
//! After a successful release, resources that the last successful release
//! applied but the new manifests no longer contain are deleted. After a
//! failed release, versioned resources of older and failed releases are
//! deleted and those releases leave the history.

use std::collections::HashSet;

use kdeploy_core::kind::sort_in_deletion_order;
use kdeploy_core::{KubernetesResource, KubernetesResourceId, ReleaseHistory, ReleaseStatus};
use tracing::debug;

use crate::error::Result;
use crate::orchestrator::Orchestrator;

/// Ids in deletion order, the exact reverse of creation order
pub fn arrange_in_deletion_order(mut ids: Vec<KubernetesResourceId>) -> Vec<KubernetesResourceId> {
    sort_in_deletion_order(&mut ids, |id| id.kind.as_str());
    ids
}

/// Resources of the last successful release missing from the current ones
///
/// Versioned ids and resources annotated to skip pruning are never returned.
pub fn resources_to_be_pruned_in_order(
    last_successful_resources: &[KubernetesResource],
    current_resources: &[KubernetesResource],
) -> Vec<KubernetesResourceId> {
    let current: HashSet<&KubernetesResourceId> =
        current_resources.iter().map(|r| &r.resource_id).collect();

    let pruned = last_successful_resources
        .iter()
        .filter(|r| !r.is_skip_pruning())
        .map(|r| &r.resource_id)
        .filter(|id| !id.versioned && !current.contains(id))
        .cloned()
        .collect();

    arrange_in_deletion_order(pruned)
}

/// Delete resources dropped since the last successful release
///
/// Individual delete failures are logged and skipped; the deleted ids are
/// returned.
pub async fn prune(
    orchestrator: &Orchestrator<'_>,
    history: &ReleaseHistory,
    current_resources: &[KubernetesResource],
) -> Result<Vec<KubernetesResourceId>> {
    let log = orchestrator.log;

    let Some(last_successful) = history.last_successful_release() else {
        log.info("\nNo previous successful release found, so no pruning required");
        return Ok(Vec::new());
    };

    if last_successful.resources_with_spec.is_empty() {
        log.warn(&format!(
            "\nRelease {} was recorded without resource specs, pruning can't be done",
            last_successful.number
        ));
        return Ok(Vec::new());
    }

    let to_prune =
        resources_to_be_pruned_in_order(&last_successful.resources_with_spec, current_resources);
    if to_prune.is_empty() {
        log.info("\nNo resource is eligible for pruning");
        return Ok(Vec::new());
    }

    log.info(&format!(
        "\nPruning {} resource(s) dropped since release {}",
        to_prune.len(),
        last_successful.number
    ));
    let deleted = orchestrator
        .execute_delete_handling_partial_execution(&to_prune, true)
        .await?;
    debug!(requested = to_prune.len(), deleted = deleted.len(), "prune finished");
    Ok(deleted)
}

/// Remove releases older than the last successful one, and failed ones
///
/// Their versioned resources are deleted first, oldest release first. A
/// failed delete is logged and does not keep the release in the history.
pub async fn cleanup(orchestrator: &Orchestrator<'_>, history: &mut ReleaseHistory) -> Result<()> {
    let log = orchestrator.log;
    let last_successful = history
        .last_successful_release()
        .map(|r| r.number)
        .unwrap_or(0);

    if last_successful == 0 {
        log.info("\nNo previous successful release found.");
    } else {
        log.info(&format!("\nPrevious Successful Release is {last_successful}"));
    }
    log.info("\nCleaning up older and failed releases");

    let mut stale: Vec<u32> = history
        .releases
        .iter()
        .filter(|r| r.number < last_successful || r.status == ReleaseStatus::Failed)
        .map(|r| r.number)
        .collect();
    stale.sort_unstable();

    for number in &stale {
        let Some(release) = history.release(*number) else {
            continue;
        };
        let versioned = arrange_in_deletion_order(release.versioned_resources().cloned().collect());
        if !versioned.is_empty() {
            debug!(release = number, count = versioned.len(), "deleting versioned resources");
            orchestrator
                .execute_delete_handling_partial_execution(&versioned, false)
                .await?;
        }
    }

    history.retain(|r| !stale.contains(&r.number));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdeploy_core::manifest::read_manifests;
    use kdeploy_core::{FileData, MemoryLog, MockRunner, Release, ToolPaths};

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

    fn id(kind: &str, name: &str) -> KubernetesResourceId {
        KubernetesResourceId::new(kind, name, "prod")
    }

    const PREVIOUS: &str = r#"kind: Namespace
metadata:
  name: prod
---
kind: Deployment
metadata:
  name: web
  namespace: prod
---
kind: Service
metadata:
  name: web
  namespace: prod
---
kind: Service
metadata:
  name: legacy
  namespace: prod
---
kind: ConfigMap
metadata:
  name: settings
  namespace: prod
  annotations:
    kdeploy.io/skip-versioning: "true"
---
kind: ConfigMap
metadata:
  name: web-config-1
  namespace: prod
---
kind: Service
metadata:
  name: keep-me
  namespace: prod
  annotations:
    kdeploy.io/skip-pruning: "true"
"#;

    const CURRENT: &str = r#"kind: Deployment
metadata:
  name: web
  namespace: prod
---
kind: Service
metadata:
  name: web
  namespace: prod
"#;

    #[test]
    fn test_deletion_order_is_reverse_of_creation() {
        let ids = vec![
            id("Deployment", "web"),
            id("Namespace", "prod"),
            id("ConfigMap", "a"),
            id("Service", "web"),
        ];
        let mut creation = ids.clone();
        kdeploy_core::kind::sort_in_creation_order(&mut creation, |i| i.kind.as_str());

        let deletion = arrange_in_deletion_order(ids);
        let reversed: Vec<_> = creation.into_iter().rev().collect();
        assert_eq!(deletion, reversed);
        assert_eq!(deletion[0].kind, "Deployment");
        assert_eq!(deletion[3].kind, "Namespace");
    }

    #[test]
    fn test_prune_set_excludes_current_skipped_and_versioned() {
        let previous = resources(PREVIOUS);
        assert!(previous.iter().any(|r| r.resource_id.versioned));

        let pruned = resources_to_be_pruned_in_order(&previous, &resources(CURRENT));

        let refs: Vec<String> = pruned.iter().map(|i| i.kind_name_ref()).collect();
        assert_eq!(refs, vec!["Service/legacy", "ConfigMap/settings", "Namespace/prod"]);
        assert!(pruned.iter().all(|i| !i.versioned));
    }

    #[tokio::test]
    async fn test_prune_deletes_dropped_resources() {
        let fx = Fixture::new();
        fx.runner.fail_on("delete ConfigMap/settings", 1, "forbidden");
        let mut history = ReleaseHistory::new();
        let release = history.create_new_release();
        release.status = ReleaseStatus::Succeeded;
        release.record_resources(&resources(PREVIOUS));
        history.create_new_release();

        let deleted = prune(&fx.orchestrator(), &history, &resources(CURRENT))
            .await
            .unwrap();

        let refs: Vec<String> = deleted.iter().map(|i| i.kind_name_ref()).collect();
        assert_eq!(refs, vec!["Service/legacy", "Namespace/prod"]);
        assert!(fx.log.contains("Failed to delete resource ConfigMap/settings"));
        assert_eq!(fx.runner.count_matching("keep-me"), 0);
        assert_eq!(fx.runner.count_matching("web-config-1"), 0);
    }

    #[tokio::test]
    async fn test_prune_without_successful_release() {
        let fx = Fixture::new();
        let mut history = ReleaseHistory::new();
        history.create_new_release();

        let deleted = prune(&fx.orchestrator(), &history, &resources(CURRENT))
            .await
            .unwrap();

        assert!(deleted.is_empty());
        assert!(fx.runner.invocations().is_empty());
        assert!(fx.log.contains("No previous successful release found"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_older_and_failed_releases() {
        let fx = Fixture::new();
        let mut history = ReleaseHistory::new();
        history
            .add_release(Release::new(1, ReleaseStatus::Succeeded).with_resources(vec![
                id("ConfigMap", "web-config-1").versioned(true),
                id("Deployment", "web"),
            ]))
            .unwrap();
        history
            .add_release(Release::new(2, ReleaseStatus::Failed).with_resources(vec![
                id("Secret", "web-secret-2").versioned(true),
                id("ConfigMap", "web-config-2").versioned(true),
            ]))
            .unwrap();
        history
            .add_release(Release::new(3, ReleaseStatus::Succeeded).with_resources(vec![
                id("ConfigMap", "web-config-3").versioned(true),
                id("Deployment", "web"),
            ]))
            .unwrap();

        cleanup(&fx.orchestrator(), &mut history).await.unwrap();

        let numbers: Vec<u32> = history.releases.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![3]);
        assert_eq!(
            fx.runner.printed_invocations(),
            vec![
                "kubectl delete ConfigMap/web-config-1 --namespace=prod",
                "kubectl delete ConfigMap/web-config-2 --namespace=prod",
                "kubectl delete Secret/web-secret-2 --namespace=prod",
            ]
        );
        assert_eq!(fx.runner.count_matching("Deployment/web"), 0);
        assert!(fx.log.contains("Previous Successful Release is 3"));
        assert!(fx.log.contains("Cleaning up older and failed releases"));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_going_when_delete_fails() {
        let fx = Fixture::new();
        fx.runner.fail_on("delete", 1, "connection refused");
        let mut history = ReleaseHistory::new();
        history
            .add_release(Release::new(1, ReleaseStatus::Failed).with_resources(vec![
                id("ConfigMap", "web-config-1").versioned(true),
            ]))
            .unwrap();

        cleanup(&fx.orchestrator(), &mut history).await.unwrap();

        assert!(history.is_empty());
        assert!(fx.log.contains("No previous successful release found."));
        assert!(fx.log.contains("Failed to delete resource ConfigMap/web-config-1"));
    }
}
