use std::path::PathBuf;

use async_trait::async_trait;
use kdeploy_core::manifest::delete_skipped_manifest_files;
use kdeploy_core::{CommandLine, FileData};

use super::{RENDERED_MANIFEST_FILE, RenderContext, Renderer};
use crate::config::HelmVersion;
use crate::error::Result;
use crate::values::write_values_to_file;

/// `helm template` for a chart fetched into the manifest directory
#[derive(Debug, Clone)]
pub struct HelmRenderer {
    /// Chart directory relative to the manifest directory, for chart repositories
    pub chart_dir: Option<PathBuf>,
    pub helm_version: HelmVersion,
    /// Appended after the generated arguments
    pub command_flags: Vec<String>,
}

/// Argument layout of `helm template` per helm major version
pub fn helm_template_args(
    helm_version: HelmVersion,
    chart_location: &str,
    release_name: &str,
    namespace: &str,
) -> Vec<String> {
    let args: Vec<&str> = match helm_version {
        HelmVersion::V2 => vec![
            "template",
            chart_location,
            "--name",
            release_name,
            "--namespace",
            namespace,
        ],
        HelmVersion::V3 => vec![
            "template",
            release_name,
            chart_location,
            "--namespace",
            namespace,
        ],
    };
    args.into_iter().map(String::from).collect()
}

#[async_trait]
impl Renderer for HelmRenderer {
    async fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<FileData>> {
        let chart_dir = match &self.chart_dir {
            Some(dir) => ctx.manifest_dir.join(dir),
            None => ctx.manifest_dir.to_path_buf(),
        };

        delete_skipped_manifest_files(&chart_dir, ctx.log)?;
        let values_args = write_values_to_file(&chart_dir, ctx.overrides)?;
        tracing::info!(values = ?values_args, "helm values file options");

        ctx.log.info("Rendering chart files using Helm");
        ctx.log.info(&format!("Using helm binary {}", ctx.tools.helm));

        let chart_location = chart_dir.display().to_string();
        let command = CommandLine::new(&ctx.tools.helm)
            .args(helm_template_args(
                self.helm_version,
                &chart_location,
                ctx.release_name,
                ctx.namespace,
            ))
            .args(values_args)
            .args(self.command_flags.iter().cloned())
            .current_dir(&chart_dir);

        ctx.log.info("Running Helm command");
        ctx.log.info(&command.printable());

        let content = ctx.run(command, "Failed to render helm chart.").await?;
        Ok(vec![FileData::new(RENDERED_MANIFEST_FILE, content)])
    }
}
