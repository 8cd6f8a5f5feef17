//! Release history persistence
//!
//! One cluster object per release name holds the whole [`ReleaseHistory`]
//! under the data key `releaseHistory`:
//! - **Secrets** (preferred): YAML compressed (zstd by default) and base64-encoded
//! - **ConfigMap**: plain YAML, readable with `kubectl get cm -o yaml`
//!
//! [`KubeHistoryStore`] reads the Secret first and falls back to the
//! ConfigMap, so releases recorded by older deployments keep working. Saving
//! to a ConfigMap removes the Secret so it cannot shadow the newer history.

mod configmap;
mod mock;
mod secrets;

pub use configmap::ConfigMapHistoryStore;
pub use mock::{MockHistoryStore, OperationCounts};
pub use secrets::SecretHistoryStore;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use kdeploy_core::{ExecutionLog, KubernetesResourceId, ReleaseHistory};
use kube::Client;

use crate::error::{KubeError, Result};

/// Data key holding the serialized history
pub const HISTORY_DATA_KEY: &str = "releaseHistory";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const RELEASE_NAME_LABEL: &str = "kdeploy.io/release-name";
pub const COMPRESSION_LABEL: &str = "kdeploy.io/compression";

/// Persistence of the release history of one namespace
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ReleaseHistoryStore: Send + Sync {
    /// History of a release; empty when nothing was recorded yet
    async fn load(&self, release_name: &str) -> Result<ReleaseHistory>;

    /// Overwrite the stored history
    ///
    /// Stores backed by both kinds write a Secret when `prefer_secret` is set
    /// and a ConfigMap otherwise; single-kind stores ignore the flag.
    async fn save(
        &self,
        release_name: &str,
        history: &ReleaseHistory,
        prefer_secret: bool,
    ) -> Result<()>;

    /// Cluster objects currently holding history for this release
    async fn history_objects(&self, release_name: &str) -> Result<Vec<KubernetesResourceId>>;

    /// Remove the stored history; a missing object is not an error
    async fn delete(&self, release_name: &str) -> Result<()>;
}

/// Compression method for Secret payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression
    Gzip { level: u32 },

    /// Zstd compression (better ratio, faster)
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

impl CompressionMethod {
    /// Value of the compression label
    pub fn label(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Gzip { .. } => "gzip",
            CompressionMethod::Zstd { .. } => "zstd",
        }
    }

    /// Method named by a compression label; unknown labels yield `None`
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "none" => Some(CompressionMethod::None),
            "gzip" => Some(CompressionMethod::Gzip { level: 6 }),
            "zstd" => Some(CompressionMethod::Zstd { level: 3 }),
            _ => None,
        }
    }
}

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Encode a history for a Secret (serialize + compress + base64)
#[must_use = "encoded data should be used for storage"]
pub fn encode_history(history: &ReleaseHistory, compression: CompressionMethod) -> Result<String> {
    let yaml = history.to_yaml()?;
    let compressed = compress(yaml.as_bytes(), compression)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        &compressed,
    ))
}

/// Decode a Secret payload (base64 + decompress + deserialize)
#[must_use = "decoded history should be used"]
pub fn decode_history(data: &str, compression: CompressionMethod) -> Result<ReleaseHistory> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data.trim())
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let decompressed = decompress(&decoded, compression)?;
    let yaml = String::from_utf8(decompressed)
        .map_err(|e| KubeError::Serialization(format!("invalid UTF-8 in history: {}", e)))?;
    Ok(ReleaseHistory::from_yaml(&yaml)?)
}

/// Labels applied to every history object
#[must_use = "labels should be applied to resources"]
pub fn storage_labels(release_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), "kdeploy".to_string());
    labels.insert(RELEASE_NAME_LABEL.to_string(), release_name.to_string());
    labels
}

/// Secret-preferred store with ConfigMap fallback
#[derive(Clone)]
pub struct KubeHistoryStore {
    secrets: Arc<dyn ReleaseHistoryStore>,
    config_maps: Arc<dyn ReleaseHistoryStore>,
}

impl KubeHistoryStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self::from_stores(
            Arc::new(SecretHistoryStore::new(client.clone(), namespace)),
            Arc::new(ConfigMapHistoryStore::new(client, namespace)),
        )
    }

    /// Layer two single-kind stores
    pub fn from_stores(
        secrets: Arc<dyn ReleaseHistoryStore>,
        config_maps: Arc<dyn ReleaseHistoryStore>,
    ) -> Self {
        Self {
            secrets,
            config_maps,
        }
    }
}

#[async_trait]
impl ReleaseHistoryStore for KubeHistoryStore {
    async fn load(&self, release_name: &str) -> Result<ReleaseHistory> {
        let history = self.secrets.load(release_name).await?;
        if !history.is_empty() {
            return Ok(history);
        }
        tracing::debug!(release = release_name, "no history secret, trying configmap");
        self.config_maps.load(release_name).await
    }

    async fn save(
        &self,
        release_name: &str,
        history: &ReleaseHistory,
        prefer_secret: bool,
    ) -> Result<()> {
        if prefer_secret {
            return self.secrets.save(release_name, history, true).await;
        }
        self.config_maps.save(release_name, history, false).await?;
        self.secrets.delete(release_name).await
    }

    async fn history_objects(&self, release_name: &str) -> Result<Vec<KubernetesResourceId>> {
        let mut ids = self.config_maps.history_objects(release_name).await?;
        ids.extend(self.secrets.history_objects(release_name).await?);
        Ok(ids)
    }

    async fn delete(&self, release_name: &str) -> Result<()> {
        self.secrets.delete(release_name).await?;
        self.config_maps.delete(release_name).await
    }
}

/// Every resource any release of `release_name` created, plus the history
/// objects themselves, deduplicated in first-seen order
pub async fn fetch_all_resources_for_release(
    store: &dyn ReleaseHistoryStore,
    release_name: &str,
    log: &dyn ExecutionLog,
) -> Result<Vec<KubernetesResourceId>> {
    log.info(&format!(
        "Fetching all resources created for release: {release_name}"
    ));

    let history = store.load(release_name).await?;
    if history.is_empty() {
        log.info("No resource history was available");
        return Ok(Vec::new());
    }

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let release_resources = history.releases.iter().flat_map(|r| r.resources.iter().cloned());
    for id in release_resources.chain(store.history_objects(release_name).await?) {
        if seen.insert(id.identifier()) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdeploy_core::{MemoryLog, Release, ReleaseStatus};

    fn history() -> ReleaseHistory {
        let mut history = ReleaseHistory::new();
        history
            .add_release(
                Release::new(1, ReleaseStatus::Succeeded).with_resources(vec![
                    KubernetesResourceId::new("Deployment", "web", "prod"),
                    KubernetesResourceId::new("ConfigMap", "web-1", "prod").versioned(true),
                ]),
            )
            .unwrap();
        history
            .add_release(
                Release::new(2, ReleaseStatus::Failed).with_resources(vec![
                    KubernetesResourceId::new("Deployment", "web", "prod"),
                    KubernetesResourceId::new("ConfigMap", "web-2", "prod").versioned(true),
                ]),
            )
            .unwrap();
        history
    }

    #[test]
    fn test_compression_roundtrip_zstd() {
        let data = b"Hello, World! This is test data for compression.";
        let compressed = compress(data, CompressionMethod::Zstd { level: 3 }).unwrap();
        let decompressed = decompress(&compressed, CompressionMethod::Zstd { level: 3 }).unwrap();
        assert_eq!(data.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_compression_roundtrip_gzip() {
        let data = b"Hello, World! This is test data for compression.";
        let compressed = compress(data, CompressionMethod::Gzip { level: 6 }).unwrap();
        let decompressed = decompress(&compressed, CompressionMethod::Gzip { level: 6 }).unwrap();
        assert_eq!(data.as_slice(), decompressed.as_slice());
    }

    #[test]
    fn test_compression_none() {
        let data = b"No compression test data";
        let compressed = compress(data, CompressionMethod::None).unwrap();
        assert_eq!(data.as_slice(), compressed.as_slice());
    }

    #[test]
    fn test_encode_decode_history() {
        let original = history();
        for method in [
            CompressionMethod::None,
            CompressionMethod::Gzip { level: 6 },
            CompressionMethod::Zstd { level: 3 },
        ] {
            let encoded = encode_history(&original, method).unwrap();
            let decoded = decode_history(&encoded, method).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_history("not base64!!", CompressionMethod::None).unwrap_err();
        assert!(matches!(err, KubeError::Serialization(_)));
    }

    #[test]
    fn test_compression_labels() {
        for method in [
            CompressionMethod::None,
            CompressionMethod::Gzip { level: 6 },
            CompressionMethod::Zstd { level: 3 },
        ] {
            assert_eq!(CompressionMethod::from_label(method.label()), Some(method));
        }
        assert!(CompressionMethod::from_label("lz4").is_none());
    }

    #[test]
    fn test_storage_labels() {
        let labels = storage_labels("web");
        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some("kdeploy"));
        assert_eq!(labels.get(RELEASE_NAME_LABEL).map(String::as_str), Some("web"));
    }

    #[tokio::test]
    async fn test_fetch_all_resources_for_release() {
        let store = MockHistoryStore::new("prod");
        store.save("web", &history(), true).await.unwrap();
        let log = MemoryLog::new();

        let ids = fetch_all_resources_for_release(&store, "web", &log).await.unwrap();
        let names: Vec<_> = ids.iter().map(KubernetesResourceId::identifier).collect();

        assert_eq!(
            names,
            vec![
                "prod/Deployment/web",
                "prod/ConfigMap/web-2",
                "prod/ConfigMap/web-1",
                "prod/Secret/web",
            ]
        );
        assert!(log.contains("Fetching all resources created for release: web"));
    }

    fn layered() -> (KubeHistoryStore, MockHistoryStore, MockHistoryStore) {
        let secrets = MockHistoryStore::new("prod");
        let config_maps = MockHistoryStore::new("prod");
        let store = KubeHistoryStore::from_stores(
            Arc::new(secrets.clone()),
            Arc::new(config_maps.clone()),
        );
        (store, secrets, config_maps)
    }

    #[tokio::test]
    async fn test_layered_store_falls_back_to_configmap() {
        let (store, _secrets, config_maps) = layered();
        config_maps.save("web", &history(), false).await.unwrap();

        assert_eq!(store.load("web").await.unwrap(), history());
    }

    #[tokio::test]
    async fn test_saving_to_configmap_drops_the_secret() {
        let (store, secrets, config_maps) = layered();
        store.save("web", &history(), true).await.unwrap();

        let mut newer = history();
        newer.create_new_release().status = ReleaseStatus::Succeeded;
        store.save("web", &newer, false).await.unwrap();

        assert!(secrets.history("web").is_none());
        assert_eq!(config_maps.history("web"), Some(newer.clone()));
        assert_eq!(store.load("web").await.unwrap(), newer);
        assert_eq!(
            store.history_objects("web").await.unwrap(),
            vec![KubernetesResourceId::new("ConfigMap", "web", "prod")]
        );
    }

    #[tokio::test]
    async fn test_fetch_all_resources_without_history() {
        let store = MockHistoryStore::new("prod");
        let log = MemoryLog::new();

        let ids = fetch_all_resources_for_release(&store, "web", &log).await.unwrap();
        assert!(ids.is_empty());
        assert!(log.contains("No resource history was available"));
    }
}
