use std::time::Duration;

use async_trait::async_trait;
use kdeploy_core::KubernetesResourceId;

use super::events::status_sink;
use super::{CheckContext, SteadyState, SteadyStateCheck};
use crate::error::Result;
use crate::explanation;

const STATUS: &str = "{.status}";
const COMPLETE_CONDITION: &str = r#"{.status.conditions[?(@.type=="Complete")].status}"#;
const FAILED_CONDITION: &str = r#"{.status.conditions[?(@.type=="Failed")].status}"#;
const COMPLETION_TIME: &str = "{.status.completionTime}";

/// Polls a Job until it completes or fails
#[derive(Debug, Clone, Copy)]
pub struct JobStatusCheck {
    pub poll_interval: Duration,
}

impl Default for JobStatusCheck {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl JobStatusCheck {
    /// One jsonpath field of the job, quotes removed
    async fn field(
        &self,
        id: &KubernetesResourceId,
        jsonpath: &str,
        ctx: &CheckContext<'_>,
    ) -> Result<String> {
        let command = ctx
            .orchestrator
            .kubectl()
            .job_jsonpath(&id.name, &id.namespace, jsonpath);
        let output = ctx.orchestrator.runner.execute_silent(&command).await?;
        if !output.is_success() {
            return Err(explanation::job_failed(
                &id.name,
                explanation::process_failure(&command, &output),
            )
            .into());
        }
        Ok(output.stdout.replace('\'', "").trim().to_string())
    }
}

#[async_trait]
impl SteadyStateCheck for JobStatusCheck {
    async fn check(&self, id: &KubernetesResourceId, ctx: &CheckContext<'_>) -> Result<SteadyState> {
        let log = ctx.orchestrator.log;
        let status = ctx
            .orchestrator
            .kubectl()
            .job_jsonpath(&id.name, &id.namespace, STATUS);
        log.info(&format!("\n{}", status.printable()));

        let sink = status_sink(log, &id.name, ctx.name_width);
        loop {
            let output = ctx.orchestrator.runner.execute(&status, Some(&sink)).await?;
            if !output.is_success() {
                return Err(explanation::job_failed(
                    &id.name,
                    explanation::process_failure(&status, &output),
                )
                .into());
            }

            if self.field(id, COMPLETE_CONDITION, ctx).await? == "True"
                && !self.field(id, COMPLETION_TIME, ctx).await?.is_empty()
            {
                return Ok(SteadyState::Succeeded);
            }

            if self.field(id, FAILED_CONDITION, ctx).await? == "True" {
                log.error(&format!("\nJob {} failed.", id.name));
                return Ok(SteadyState::Failed);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
