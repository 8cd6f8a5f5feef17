//! CLI commands

pub mod deploy;
pub mod history;
pub mod render;

use std::path::PathBuf;
use std::sync::Arc;

use kdeploy_core::{ExecutionLog, ToolPaths};
use kdeploy_engine::{LocalDirectoryProvider, ManifestFetcher, StoreType};
use kdeploy_kube::{ConsoleLog, JsonLog};
use kube::config::{KubeConfigOptions, Kubeconfig};

use crate::OutputFormat;
use crate::error::{CliError, Result};

/// Options shared by every subcommand
pub struct Globals {
    pub tools: Option<PathBuf>,
    pub kubeconfig: Option<PathBuf>,
    pub kubectl: Option<String>,
    pub output: OutputFormat,
}

impl Globals {
    /// Tool paths from the config file, with command line overrides applied
    pub fn tool_paths(&self) -> Result<ToolPaths> {
        let mut tools = match &self.tools {
            Some(path) => ToolPaths::from_file(path).map_err(|e| {
                CliError::input_with_help(
                    format!("Failed to load tool paths from {}: {e}", path.display()),
                    "The tools file is YAML with kubectl, oc, helm and kustomize paths",
                )
            })?,
            None => ToolPaths::load_default()?,
        };
        if let Some(kubeconfig) = &self.kubeconfig {
            tools.kubeconfig = Some(kubeconfig.clone());
        }
        if let Some(kubectl) = &self.kubectl {
            tools.kubectl = kubectl.clone();
        }
        Ok(tools)
    }

    /// API client for the configured kubeconfig, or the inferred one
    pub async fn client(&self, tools: &ToolPaths) -> Result<kube::Client> {
        let config = match &tools.kubeconfig {
            Some(path) => {
                let kubeconfig =
                    Kubeconfig::read_from(path).map_err(|e| CliError::cluster(e.to_string()))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| CliError::cluster(e.to_string()))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| CliError::cluster(e.to_string()))?,
        };
        kube::Client::try_from(config).map_err(|e| CliError::cluster(e.to_string()))
    }

    pub fn execution_log(&self) -> OutputLog {
        match self.output {
            OutputFormat::Text => OutputLog::Console(ConsoleLog::new()),
            OutputFormat::Json => OutputLog::Json(JsonLog::new()),
        }
    }
}

/// Execution log picked by `--output`
pub enum OutputLog {
    Console(ConsoleLog),
    Json(JsonLog),
}

impl OutputLog {
    pub fn as_log(&self) -> &dyn ExecutionLog {
        match self {
            OutputLog::Console(log) => log,
            OutputLog::Json(log) => log,
        }
    }

    pub fn header(&self, title: &str) {
        match self {
            OutputLog::Console(log) => log.header(title),
            OutputLog::Json(log) => log.info(title),
        }
    }

    pub fn summary(&self, succeeded: bool) {
        if let OutputLog::Console(log) = self {
            log.summary(succeeded);
        }
    }
}

/// Fetcher reading git stores from local checkouts
pub fn local_fetcher() -> ManifestFetcher {
    ManifestFetcher::new().with_provider(StoreType::Git, Arc::new(LocalDirectoryProvider::new()))
}
