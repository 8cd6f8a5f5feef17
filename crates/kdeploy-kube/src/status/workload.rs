use async_trait::async_trait;
use kdeploy_core::KubernetesResourceId;

use super::events::status_sink;
use super::{CheckContext, SteadyState, SteadyStateCheck};
use crate::error::Result;
use crate::kubectl::Kubectl;

/// `kubectl rollout status --watch=true` for Deployments, StatefulSets, DaemonSets
#[derive(Debug, Default, Clone, Copy)]
pub struct RolloutStatusCheck;

/// `oc rollout status`, the only client that understands DeploymentConfigs
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentConfigCheck;

async fn rollout_status(
    client: Kubectl,
    id: &KubernetesResourceId,
    ctx: &CheckContext<'_>,
) -> Result<SteadyState> {
    let log = ctx.orchestrator.log;
    let command = client.rollout_status(id);
    log.info(&format!("\n{}", command.printable()));

    let sink = status_sink(log, &id.name, ctx.name_width);
    let output = ctx.orchestrator.runner.execute(&command, Some(&sink)).await?;

    if output.is_success() {
        Ok(SteadyState::Succeeded)
    } else {
        tracing::warn!(resource = %id, exit_code = output.exit_code, "rollout status failed");
        Ok(SteadyState::Failed)
    }
}

#[async_trait]
impl SteadyStateCheck for RolloutStatusCheck {
    async fn check(&self, id: &KubernetesResourceId, ctx: &CheckContext<'_>) -> Result<SteadyState> {
        rollout_status(ctx.orchestrator.kubectl(), id, ctx).await
    }
}

#[async_trait]
impl SteadyStateCheck for DeploymentConfigCheck {
    async fn check(&self, id: &KubernetesResourceId, ctx: &CheckContext<'_>) -> Result<SteadyState> {
        let client = Kubectl::oc(ctx.orchestrator.tools).in_dir(ctx.orchestrator.working_dir);
        rollout_status(client, id, ctx).await
    }
}
