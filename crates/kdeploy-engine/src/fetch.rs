//! Manifest fetching
//!
//! Fetching is delegated to [`FileProvider`] implementations registered per
//! store type. The wire protocols of git and chart repositories live behind
//! that trait; this module only dispatches and handles inline files.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use kdeploy_core::{CoreError, ExecutionLog, FileData};
use tracing::debug;

use crate::config::{ManifestDelegateConfig, StoreDelegateConfig, StoreType};
use crate::error::{EngineError, Result};

/// Fetches raw manifest files for one kind of store into a directory
#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn fetch(
        &self,
        manifest: &ManifestDelegateConfig,
        destination: &Path,
        log: &dyn ExecutionLog,
    ) -> Result<()>;
}

/// Dispatches a fetch to the provider registered for the store type
#[derive(Clone, Default)]
pub struct ManifestFetcher {
    providers: HashMap<StoreType, Arc<dyn FileProvider>>,
}

impl ManifestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a store type, replacing any previous one
    pub fn with_provider(mut self, store: StoreType, provider: Arc<dyn FileProvider>) -> Self {
        self.providers.insert(store, provider);
        self
    }

    /// Register one provider for all chart repository stores
    pub fn with_chart_provider(self, provider: Arc<dyn FileProvider>) -> Self {
        self.with_provider(StoreType::HttpHelm, Arc::clone(&provider))
            .with_provider(StoreType::S3Helm, Arc::clone(&provider))
            .with_provider(StoreType::GcsHelm, provider)
    }

    /// Fetch the raw files of `manifest` into `destination`
    pub async fn fetch_manifest_files(
        &self,
        manifest: &ManifestDelegateConfig,
        destination: &Path,
        log: &dyn ExecutionLog,
    ) -> Result<()> {
        let store = manifest.store();
        debug!(store = %store.store_type(), destination = %destination.display(), "fetching manifests");

        if let StoreDelegateConfig::Inline { files } = store {
            log.info("Writing inline manifest files");
            return write_inline_files(files, destination);
        }

        let provider = self.providers.get(&store.store_type()).ok_or_else(|| {
            EngineError::Unsupported {
                what: "store delegate config type".to_string(),
                value: store.store_type().to_string(),
            }
        })?;
        provider.fetch(manifest, destination, log).await
    }
}

/// Join a relative path onto `root`, rejecting absolute paths and `..`
fn sandboxed_join(root: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(CoreError::InvalidArguments {
            argument: "filePath".to_string(),
            message: format!("path escapes the manifest directory: {relative}"),
        }
        .into());
    }
    Ok(root.join(path))
}

fn write_inline_files(files: &[FileData], destination: &Path) -> Result<()> {
    for file in files {
        let target = sandboxed_join(destination, &file.file_path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, &file.content)?;
    }
    Ok(())
}

/// Provider for stores that are already checked out on local disk
///
/// `repo_url` of a git store is read as a directory; every configured path
/// (or the whole directory when none are set) is copied into the destination.
#[derive(Debug, Clone, Default)]
pub struct LocalDirectoryProvider;

impl LocalDirectoryProvider {
    pub fn new() -> Self {
        Self
    }

    fn copy_tree(source: &Path, destination: &Path) -> Result<usize> {
        let mut copied = 0;
        for entry in walkdir::WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let target = destination.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)?;
                copied += 1;
            }
        }
        Ok(copied)
    }
}

#[async_trait]
impl FileProvider for LocalDirectoryProvider {
    async fn fetch(
        &self,
        manifest: &ManifestDelegateConfig,
        destination: &Path,
        log: &dyn ExecutionLog,
    ) -> Result<()> {
        let StoreDelegateConfig::Git { repo_url, paths, .. } = manifest.store() else {
            return Err(EngineError::Unsupported {
                what: "store for local directory provider".to_string(),
                value: manifest.store().store_type().to_string(),
            });
        };

        let root = PathBuf::from(repo_url.trim_start_matches("file://"));
        if !root.is_dir() {
            return Err(EngineError::Fetch {
                store: repo_url.clone(),
                message: "directory does not exist".to_string(),
            });
        }

        let sources: Vec<PathBuf> = if paths.is_empty() {
            vec![root.clone()]
        } else {
            paths
                .iter()
                .map(|p| sandboxed_join(&root, p))
                .collect::<Result<_>>()?
        };

        for source in sources {
            log.info(&format!("Fetching manifest files from {}", source.display()));
            let copied = if source.is_file() {
                let name = source.file_name().map(PathBuf::from).unwrap_or_default();
                std::fs::copy(&source, destination.join(name))?;
                1
            } else {
                Self::copy_tree(&source, destination)?
            };
            debug!(source = %source.display(), copied, "copied manifest files");
        }

        log.info("Successfully fetched following files:");
        for file in kdeploy_core::manifest::read_manifest_files_from_directory(destination)? {
            log.info(&format!("- {}", file.file_path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdeploy_core::MemoryLog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider(AtomicUsize);

    #[async_trait]
    impl FileProvider for CountingProvider {
        async fn fetch(
            &self,
            _manifest: &ManifestDelegateConfig,
            destination: &Path,
            _log: &dyn ExecutionLog,
        ) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::fs::write(destination.join("Chart.yaml"), "name: nginx\n")?;
            Ok(())
        }
    }

    fn helm(store: StoreDelegateConfig) -> ManifestDelegateConfig {
        ManifestDelegateConfig::HelmChart {
            store,
            chart_name: "nginx".into(),
            chart_version: None,
            helm_version: Default::default(),
            command_flags: vec![],
        }
    }

    #[tokio::test]
    async fn test_inline_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ManifestDelegateConfig::K8sManifest {
            store: StoreDelegateConfig::Inline {
                files: vec![FileData::new("templates/app.yaml", "kind: Service\n")],
            },
        };

        ManifestFetcher::new()
            .fetch_manifest_files(&manifest, dir.path(), &MemoryLog::new())
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("templates/app.yaml")).unwrap();
        assert_eq!(content, "kind: Service\n");
    }

    #[tokio::test]
    async fn test_inline_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ManifestDelegateConfig::K8sManifest {
            store: StoreDelegateConfig::Inline {
                files: vec![FileData::new("../escape.yaml", "kind: Service\n")],
            },
        };

        let err = ManifestFetcher::new()
            .fetch_manifest_files(&manifest, dir.path(), &MemoryLog::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_chart_provider_serves_all_chart_stores() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let fetcher = ManifestFetcher::new().with_chart_provider(provider.clone());

        for store in [
            StoreDelegateConfig::HttpHelm { repo_url: "https://charts".into() },
            StoreDelegateConfig::GcsHelm { bucket: "b".into(), folder: None },
        ] {
            fetcher
                .fetch_manifest_files(&helm(store), dir.path(), &MemoryLog::new())
                .await
                .unwrap();
        }
        assert_eq!(provider.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregistered_store_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = helm(StoreDelegateConfig::S3Helm {
            bucket: "charts".into(),
            region: "eu-west-1".into(),
            folder: None,
        });

        let err = ManifestFetcher::new()
            .fetch_manifest_files(&manifest, dir.path(), &MemoryLog::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported store delegate config type: [S3Helm]");
    }

    #[tokio::test]
    async fn test_local_directory_provider_copies_paths() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("k8s/base")).unwrap();
        std::fs::write(repo.path().join("k8s/base/app.yaml"), "kind: Service\n").unwrap();
        std::fs::write(repo.path().join("README.md"), "docs").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let manifest = ManifestDelegateConfig::K8sManifest {
            store: StoreDelegateConfig::Git {
                repo_url: repo.path().display().to_string(),
                branch: None,
                commit_id: None,
                paths: vec!["k8s".into()],
            },
        };
        let log = MemoryLog::new();
        let fetcher = ManifestFetcher::new()
            .with_provider(StoreType::Git, Arc::new(LocalDirectoryProvider::new()));
        fetcher
            .fetch_manifest_files(&manifest, dest.path(), &log)
            .await
            .unwrap();

        assert!(dest.path().join("base/app.yaml").exists());
        assert!(!dest.path().join("README.md").exists());
        assert!(log.contains("- base/app.yaml"));
    }
}
