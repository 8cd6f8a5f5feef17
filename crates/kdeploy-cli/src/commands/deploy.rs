//! Deploy command - run one rolling deployment against the cluster

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};
use console::style;
use kdeploy_core::ProcessRunner;
use kdeploy_core::manifest::resource_ids_in_string_format;
use kdeploy_engine::{HelmVersion, ManifestDelegateConfig, StoreDelegateConfig};
use kdeploy_kube::{DeployRequest, DeployResponse, DeployTask, KubeHistoryStore};

use super::{Globals, local_fetcher};
use crate::OutputFormat;
use crate::error::{CliError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ManifestKind {
    /// Plain manifests, go-template values supported
    K8s,
    /// Helm chart in the manifest directory
    Helm,
    /// Kustomization
    Kustomize,
    /// OpenShift template
    Openshift,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Deploy request file (YAML); flags below override its toggles
    #[arg(long, conflicts_with_all = ["release", "manifests"])]
    pub request: Option<PathBuf>,

    /// Release name
    #[arg(required_unless_present = "request")]
    pub release: Option<String>,

    /// Local directory holding the manifests
    #[arg(required_unless_present = "request")]
    pub manifests: Option<PathBuf>,

    /// Target namespace [default: default]
    #[arg(short, long)]
    pub namespace: Option<String>,

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

    /// Skip the client-side dry run
    #[arg(long)]
    pub skip_dry_run: bool,

    /// Do not wait for workloads to reach steady state
    #[arg(long)]
    pub skip_steady_state_check: bool,

    /// Keep resources dropped since the last successful release
    #[arg(long)]
    pub no_prune: bool,

    /// Store the release history in a ConfigMap instead of a Secret
    #[arg(long)]
    pub configmap: bool,

    /// Steady-state timeout, e.g. 90s or 10m
    #[arg(long, value_parser = crate::parse_timeout)]
    pub timeout: Option<Duration>,
}

/// Run the deploy command
pub async fn run(globals: &Globals, args: DeployArgs) -> Result<()> {
    let request = build_request(args)?;
    let tools = globals.tool_paths()?;
    let log = globals.execution_log();

    log.header(&format!(
        "Deploying release {} to namespace {}",
        request.release_name, request.namespace
    ));

    let client = globals.client(&tools).await?;
    let store = KubeHistoryStore::new(client, &request.namespace);
    let runner = ProcessRunner::new();
    let fetcher = local_fetcher();

    let task = DeployTask::new(&runner, &tools, &fetcher, &store, log.as_log());
    let outcome = task.execute(&request).await;
    log.summary(outcome.is_ok());

    let response = outcome?;
    match globals.output {
        OutputFormat::Json => println!("{}", serde_json::to_string(&response)?),
        OutputFormat::Text => print_response(&response),
    }
    Ok(())
}

fn print_response(response: &DeployResponse) {
    println!(
        "Release {} {}",
        style(response.release_number).cyan(),
        style(response.status).green()
    );
    println!(
        "Resources:\n{}",
        resource_ids_in_string_format(&response.resources)
    );
    if !response.pruned.is_empty() {
        println!(
            "Pruned:\n{}",
            resource_ids_in_string_format(&response.pruned)
        );
    }
}

/// Request from `--request` or from flags, validated before any cluster call
pub fn build_request(args: DeployArgs) -> Result<DeployRequest> {
    let mut request = match &args.request {
        Some(path) => read_request(path)?,
        None => request_from_flags(&args)?,
    };

    if let Some(namespace) = args.namespace {
        request.namespace = namespace;
    }
    request.skip_dry_run |= args.skip_dry_run;
    request.skip_steady_state_check |= args.skip_steady_state_check;
    request.prune &= !args.no_prune;
    request.prefer_secret &= !args.configmap;
    if let Some(timeout) = args.timeout {
        request.timeout = timeout;
    }
    for values in &args.values {
        request.overrides.push(read_file(values)?);
    }

    if request.release_name.trim().is_empty() {
        return Err(CliError::input("Release name must not be empty"));
    }
    if request.namespace.trim().is_empty() {
        return Err(CliError::input("Namespace must not be empty"));
    }
    Ok(request)
}

fn read_request(path: &Path) -> Result<DeployRequest> {
    let content = read_file(path)?;
    serde_yaml::from_str(&content).map_err(|e| {
        CliError::input_with_help(
            format!("Invalid deploy request {}: {e}", path.display()),
            "A request needs releaseName, namespace and manifest.type with a manifest.store",
        )
    })
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| CliError::input(format!("Failed to read {}: {e}", path.display())))
}

/// Local directory as the store of a manifest config
pub fn local_store(dir: &Path) -> Result<StoreDelegateConfig> {
    let root = std::fs::canonicalize(dir).map_err(|e| {
        CliError::input_with_help(
            format!("Manifest directory {} not found: {e}", dir.display()),
            "Pass the directory that holds the manifests",
        )
    })?;
    if !root.is_dir() {
        return Err(CliError::input(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(StoreDelegateConfig::Git {
        repo_url: root.display().to_string(),
        branch: None,
        commit_id: None,
        paths: Vec::new(),
    })
}

/// Manifest config for a local directory rendered as `kind`
pub fn manifest_config(
    kind: ManifestKind,
    dir: &Path,
    chart_name: Option<&str>,
    kustomize_dir: &str,
    template_path: Option<&str>,
) -> Result<ManifestDelegateConfig> {
    let store = local_store(dir)?;
    Ok(match kind {
        ManifestKind::K8s => ManifestDelegateConfig::K8sManifest { store },
        ManifestKind::Helm => ManifestDelegateConfig::HelmChart {
            store,
            chart_name: chart_name
                .ok_or_else(|| CliError::input("--chart-name is required with --type helm"))?
                .to_string(),
            chart_version: None,
            helm_version: HelmVersion::default(),
            command_flags: Vec::new(),
        },
        ManifestKind::Kustomize => ManifestDelegateConfig::Kustomize {
            store,
            kustomize_dir_path: kustomize_dir.to_string(),
            plugin_path: None,
        },
        ManifestKind::Openshift => ManifestDelegateConfig::OpenshiftTemplate {
            store,
            template_path: template_path
                .ok_or_else(|| CliError::input("--template-path is required with --type openshift"))?
                .to_string(),
        },
    })
}

fn request_from_flags(args: &DeployArgs) -> Result<DeployRequest> {
    let (Some(release), Some(manifests)) = (&args.release, &args.manifests) else {
        return Err(CliError::input("A release name and a manifest directory are required"));
    };
    let manifest = manifest_config(
        args.kind,
        manifests,
        args.chart_name.as_deref(),
        &args.kustomize_dir,
        args.template_path.as_deref(),
    )?;
    Ok(DeployRequest::new(release.clone(), "default", manifest))
}
