//! External tool configuration
//!
//! Stored in `~/.config/kdeploy/tools.yaml`. Every field is optional; a
//! missing file means every tool is looked up on `PATH`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Paths and switches for the CLI tools the deployment core drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolPaths {
    pub kubectl: String,
    pub oc: String,
    pub helm: String,
    pub kustomize: String,
    pub go_template: String,

    /// Passed as `--kubeconfig` when set
    pub kubeconfig: Option<PathBuf>,

    /// `--dry-run=client` instead of the deprecated `--dry-run`
    pub use_new_kubectl: bool,

    /// Rewrite kustomize overrides into `patchesStrategicMerge`
    pub use_var_support_for_kustomize: bool,

    /// Kustomize plugin directory, exported as `XDG_CONFIG_HOME`
    pub kustomize_plugin_path: Option<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            oc: "oc".to_string(),
            helm: "helm".to_string(),
            kustomize: "kustomize".to_string(),
            go_template: "go-template".to_string(),
            kubeconfig: None,
            use_new_kubectl: true,
            use_var_support_for_kustomize: false,
            kustomize_plugin_path: None,
        }
    }
}

impl ToolPaths {
    /// Load configuration from a specific path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default location, falling back to defaults
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("kdeploy").join("tools.yaml"))
    }

    /// `--kubeconfig=<path>` when a kubeconfig is configured
    pub fn kubeconfig_arg(&self) -> Option<String> {
        self.kubeconfig
            .as_ref()
            .map(|path| format!("--kubeconfig={}", path.display()))
    }
}
