use std::time::Duration;

use async_trait::async_trait;
use kdeploy_core::{HintedError, KubernetesResourceId};
use kdeploy_engine::ExpressionEvaluator;

use super::{CheckContext, SteadyState, SteadyStateCheck};
use crate::error::{KubeError, Result};
use crate::explanation;
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Polls a custom resource until its steady-state condition holds
///
/// Has no deadline of its own; callers wrap it in a timeout.
pub struct CustomResourceCheck<'e> {
    pub condition: String,
    pub evaluator: &'e ExpressionEvaluator,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl<'e> CustomResourceCheck<'e> {
    pub fn new(condition: impl Into<String>, evaluator: &'e ExpressionEvaluator) -> Self {
        Self {
            condition: condition.into(),
            evaluator,
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl SteadyStateCheck for CustomResourceCheck<'_> {
    async fn check(&self, id: &KubernetesResourceId, ctx: &CheckContext<'_>) -> Result<SteadyState> {
        let orchestrator = ctx.orchestrator;
        let command = orchestrator.kubectl().get_json(id);
        orchestrator.log.info(&format!("\n{}", command.printable()));

        loop {
            let command = &command;
            let output = retry_with_backoff(&self.retry, |attempt| async move {
                let output = orchestrator.runner.execute_silent(command).await?;
                if output.is_success() {
                    Ok::<_, KubeError>(output)
                } else {
                    tracing::debug!(attempt, resource = %id, "custom resource not readable");
                    Err(KubeError::from(HintedError::new(
                        format!("Failed to get {}", id.kind_name_ref()),
                        explanation::CONTROLLER_NOT_RUNNING,
                        explanation::process_failure(command, &output),
                    )))
                }
            })
            .await?;

            if self.evaluator.evaluate_condition(&self.condition, &output.stdout)? {
                return Ok(SteadyState::Succeeded);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
