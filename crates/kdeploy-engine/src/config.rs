//! Manifest and store delegate configuration
//!
//! These describe where manifests come from and which tool turns them into
//! plain Kubernetes YAML. Both are externally tagged on `type` so they read
//! naturally in a deploy request file.

use std::fmt;

use serde::{Deserialize, Serialize};

use kdeploy_core::FileData;

/// Where raw manifest files are fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreDelegateConfig {
    /// Git repository, resolved by the registered git provider
    #[serde(rename_all = "camelCase")]
    Git {
        repo_url: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        commit_id: Option<String>,
        #[serde(default)]
        paths: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    HttpHelm { repo_url: String },

    #[serde(rename_all = "camelCase")]
    S3Helm {
        bucket: String,
        region: String,
        #[serde(default)]
        folder: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    GcsHelm {
        bucket: String,
        #[serde(default)]
        folder: Option<String>,
    },

    /// Files carried in the request itself
    Inline { files: Vec<FileData> },
}

impl StoreDelegateConfig {
    pub fn store_type(&self) -> StoreType {
        match self {
            Self::Git { .. } => StoreType::Git,
            Self::HttpHelm { .. } => StoreType::HttpHelm,
            Self::S3Helm { .. } => StoreType::S3Helm,
            Self::GcsHelm { .. } => StoreType::GcsHelm,
            Self::Inline { .. } => StoreType::Inline,
        }
    }

    /// Helm chart repositories keep the chart under `<dir>/<chartName>`
    pub fn is_chart_repository(&self) -> bool {
        matches!(self, Self::HttpHelm { .. } | Self::S3Helm { .. } | Self::GcsHelm { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreType {
    Git,
    HttpHelm,
    S3Helm,
    GcsHelm,
    Inline,
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Git => "Git",
            Self::HttpHelm => "HttpHelm",
            Self::S3Helm => "S3Helm",
            Self::GcsHelm => "GcsHelm",
            Self::Inline => "Inline",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelmVersion {
    V2,
    #[default]
    V3,
}

/// Manifest type plus the store it is fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ManifestDelegateConfig {
    K8sManifest { store: StoreDelegateConfig },

    #[serde(rename_all = "camelCase")]
    HelmChart {
        store: StoreDelegateConfig,
        chart_name: String,
        #[serde(default)]
        chart_version: Option<String>,
        #[serde(default)]
        helm_version: HelmVersion,
        /// Extra flags appended to `helm template`
        #[serde(default)]
        command_flags: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    Kustomize {
        store: StoreDelegateConfig,
        /// Kustomization directory relative to the fetched root
        #[serde(default)]
        kustomize_dir_path: String,
        #[serde(default)]
        plugin_path: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    OpenshiftTemplate {
        store: StoreDelegateConfig,
        /// Template file relative to the fetched root
        template_path: String,
    },
}

impl ManifestDelegateConfig {
    pub fn store(&self) -> &StoreDelegateConfig {
        match self {
            Self::K8sManifest { store }
            | Self::HelmChart { store, .. }
            | Self::Kustomize { store, .. }
            | Self::OpenshiftTemplate { store, .. } => store,
        }
    }

    pub fn manifest_type(&self) -> &'static str {
        match self {
            Self::K8sManifest { .. } => "K8sManifest",
            Self::HelmChart { .. } => "HelmChart",
            Self::Kustomize { .. } => "Kustomize",
            Self::OpenshiftTemplate { .. } => "OpenshiftTemplate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helm_chart_from_yaml() {
        let yaml = r#"
type: helmChart
chartName: nginx
helmVersion: V2
store:
  type: httpHelm
  repoUrl: https://charts.example.com
"#;
        let config: ManifestDelegateConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.manifest_type(), "HelmChart");
        assert!(config.store().is_chart_repository());
        match config {
            ManifestDelegateConfig::HelmChart {
                chart_name,
                helm_version,
                command_flags,
                ..
            } => {
                assert_eq!(chart_name, "nginx");
                assert_eq!(helm_version, HelmVersion::V2);
                assert!(command_flags.is_empty());
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_git_store_is_not_chart_repository() {
        let store = StoreDelegateConfig::Git {
            repo_url: "https://git.example.com/app.git".into(),
            branch: Some("main".into()),
            commit_id: None,
            paths: vec!["k8s".into()],
        };
        assert!(!store.is_chart_repository());
        assert_eq!(store.store_type().to_string(), "Git");
    }
}
