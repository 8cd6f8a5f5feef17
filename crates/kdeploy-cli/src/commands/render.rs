//! Render command - fetch, render and validate manifests offline

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use kdeploy_core::ProcessRunner;
use kdeploy_core::manifest::{check_steady_state_condition, resources_to_manifest};
use kdeploy_kube::{ConsoleLog, DeployRequest, prepare_resources};

use super::deploy::{ManifestKind, manifest_config};
use super::{Globals, local_fetcher};
use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Release name (for template context)
    pub release: String,

    /// Local directory holding the manifests
    pub manifests: PathBuf,

    /// Namespace given to resources that declare none
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// How the manifest directory is rendered
    #[arg(long = "type", value_enum, default_value_t = ManifestKind::K8s)]
    pub kind: ManifestKind,

    /// Chart name (helm)
    #[arg(long)]
    pub chart_name: Option<String>,

    /// Kustomization directory relative to the manifests (kustomize)
    #[arg(long, default_value = "")]
    pub kustomize_dir: String,

    /// Template file relative to the manifests (openshift)
    #[arg(long)]
    pub template_path: Option<String>,

    /// Values file(s), applied in order
    #[arg(short = 'f', long = "values")]
    pub values: Vec<PathBuf>,

    /// Render command timeout
    #[arg(long, value_parser = crate::parse_timeout)]
    pub timeout: Option<Duration>,
}

/// Run the render command
pub async fn run(globals: &Globals, args: RenderArgs) -> Result<()> {
    let manifest = manifest_config(
        args.kind,
        &args.manifests,
        args.chart_name.as_deref(),
        &args.kustomize_dir,
        args.template_path.as_deref(),
    )?;
    let mut request = DeployRequest::new(args.release, args.namespace, manifest);
    for values in &args.values {
        let content = std::fs::read_to_string(values)
            .map_err(|e| CliError::input(format!("Failed to read {}: {e}", values.display())))?;
        request.overrides.push(content);
    }
    if let Some(timeout) = args.timeout {
        request.timeout = timeout;
    }

    let tools = globals.tool_paths()?;
    let runner = ProcessRunner::new();
    let fetcher = local_fetcher();
    // stdout carries the manifests, the log keeps to warnings on stderr
    let log = ConsoleLog::new().quiet();
    let scratch = tempfile::Builder::new().prefix("kdeploy-render-").tempdir()?;

    let resources =
        prepare_resources(&runner, &tools, &fetcher, &log, &request, scratch.path()).await?;

    let managed: Vec<_> = resources
        .iter()
        .filter(|r| r.is_managed_workload())
        .cloned()
        .collect();
    check_steady_state_condition(&managed)?;

    tracing::debug!(count = resources.len(), "rendered resources");
    print!("{}", resources_to_manifest(&resources));
    Ok(())
}
