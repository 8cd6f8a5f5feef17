//! Manifest rendering
//!
//! Each manifest type has a [`Renderer`] that turns the fetched files into
//! plain Kubernetes YAML by driving the matching external tool. The output
//! is always a flat list of [`FileData`] ready for parsing.

mod gotemplate;
mod helm;
mod kustomize;
mod openshift;

pub use gotemplate::{GoTemplateRenderer, VALUE_MISSING_REPLACEMENT};
pub use helm::{HelmRenderer, helm_template_args};
pub use kustomize::{KustomizeRenderer, save_patches_to_directory};
pub use openshift::{OpenshiftRenderer, flatten_list};

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use kdeploy_core::{CommandLine, CommandRunner, ExecutionLog, FileData, LogLevel, OutputLine, ToolPaths};

use crate::config::ManifestDelegateConfig;
use crate::error::{EngineError, Result};

/// File name used for single-output renderers
pub const RENDERED_MANIFEST_FILE: &str = "manifest.yaml";

/// Everything a renderer needs besides the manifest config
pub struct RenderContext<'a> {
    /// Directory the manifests were fetched into
    pub manifest_dir: &'a Path,
    /// Scratch directory for `template.yaml` and values files
    pub working_dir: &'a Path,
    /// Values or patch overrides, raw YAML
    pub overrides: &'a [String],
    pub release_name: &'a str,
    pub namespace: &'a str,
    pub tools: &'a ToolPaths,
    pub runner: &'a dyn CommandRunner,
    pub log: &'a dyn ExecutionLog,
    pub timeout: Duration,
}

impl RenderContext<'_> {
    /// Run a render command, streaming stderr to the execution log
    pub(crate) async fn run(&self, command: CommandLine, failure: &str) -> Result<String> {
        let command = command.timeout(self.timeout);
        let log = self.log;
        let sink = move |line: &OutputLine| {
            if line.is_stderr() {
                log.log(LogLevel::Error, line.text());
            }
        };

        let output = self.runner.execute(&command, Some(&sink)).await?;
        if !output.is_success() {
            let combined = output.combined();
            let message = if combined.is_empty() {
                failure.to_string()
            } else {
                format!("{failure} Error {combined}")
            };
            self.log.error(&message);
            return Err(EngineError::RenderFailed {
                message,
                command: command.printable(),
                exit_code: output.exit_code,
                output: combined,
            });
        }
        Ok(output.stdout)
    }
}

/// Turns fetched manifest files into plain YAML
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, ctx: &RenderContext<'_>) -> Result<Vec<FileData>>;
}

/// Pick the renderer for a manifest config
pub fn renderer_for(manifest: &ManifestDelegateConfig) -> Box<dyn Renderer> {
    match manifest {
        ManifestDelegateConfig::K8sManifest { .. } => Box::new(GoTemplateRenderer),
        ManifestDelegateConfig::HelmChart {
            store,
            chart_name,
            helm_version,
            command_flags,
            ..
        } => Box::new(HelmRenderer {
            chart_dir: store.is_chart_repository().then(|| PathBuf::from(chart_name)),
            helm_version: *helm_version,
            command_flags: command_flags.clone(),
        }),
        ManifestDelegateConfig::Kustomize {
            kustomize_dir_path,
            plugin_path,
            ..
        } => Box::new(KustomizeRenderer {
            kustomize_dir_path: kustomize_dir_path.clone(),
            plugin_path: plugin_path.clone(),
        }),
        ManifestDelegateConfig::OpenshiftTemplate { template_path, .. } => {
            Box::new(OpenshiftRenderer {
                template_path: template_path.clone(),
            })
        }
    }
}

/// Render fetched manifests with the renderer matching their type
pub async fn render_template(
    manifest: &ManifestDelegateConfig,
    ctx: &RenderContext<'_>,
) -> Result<Vec<FileData>> {
    tracing::debug!(manifest_type = manifest.manifest_type(), "rendering manifests");
    renderer_for(manifest).render(ctx).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use kdeploy_core::{MemoryLog, MockRunner};

    pub struct Fixture {
        pub dir: tempfile::TempDir,
        pub work: tempfile::TempDir,
        pub tools: ToolPaths,
        pub runner: MockRunner,
        pub log: MemoryLog,
        pub overrides: Vec<String>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                work: tempfile::tempdir().unwrap(),
                tools: ToolPaths::default(),
                runner: MockRunner::new(),
                log: MemoryLog::new(),
                overrides: Vec::new(),
            }
        }

        pub fn write(&self, path: &str, content: &str) {
            let target = self.dir.path().join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(target, content).unwrap();
        }

        pub fn ctx(&self) -> RenderContext<'_> {
            RenderContext {
                manifest_dir: self.dir.path(),
                working_dir: self.work.path(),
                overrides: &self.overrides,
                release_name: "my-release",
                namespace: "default",
                tools: &self.tools,
                runner: &self.runner,
                log: &self.log,
                timeout: Duration::from_secs(60),
            }
        }
    }
}
