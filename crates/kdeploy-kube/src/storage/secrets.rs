//! Kubernetes Secrets history driver
//!
//! The default driver. The history YAML is compressed (zstd unless
//! configured otherwise) and base64-encoded before it lands in the Secret;
//! the compression is recorded in a label so any method can be read back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kdeploy_core::{KubernetesResourceId, ReleaseHistory};
use kube::Client;
use kube::api::{Api, DeleteParams, PostParams};

use super::{
    COMPRESSION_LABEL, CompressionMethod, HISTORY_DATA_KEY, ReleaseHistoryStore, decode_history,
    encode_history, storage_labels,
};
use crate::error::{KubeError, Result};

const SECRET_TYPE: &str = "kdeploy.io/release-history.v1";

/// History stored in one Secret per release name
#[derive(Clone)]
pub struct SecretHistoryStore {
    client: Client,
    namespace: String,
    compression: CompressionMethod,
}

impl SecretHistoryStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            compression: CompressionMethod::default(),
        }
    }

    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    fn api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn build_secret(&self, release_name: &str, encoded: &str) -> Secret {
        let mut labels = storage_labels(release_name);
        labels.insert(
            COMPRESSION_LABEL.to_string(),
            self.compression.label().to_string(),
        );

        let mut data = BTreeMap::new();
        data.insert(
            HISTORY_DATA_KEY.to_string(),
            ByteString(encoded.as_bytes().to_vec()),
        );

        Secret {
            metadata: ObjectMeta {
                name: Some(release_name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    /// Compression recorded on the Secret; unlabeled Secrets use the store default
    fn compression_of(&self, secret: &Secret) -> CompressionMethod {
        secret
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(COMPRESSION_LABEL))
            .and_then(|c| CompressionMethod::from_label(c))
            .unwrap_or(self.compression)
    }

    fn parse_secret(&self, secret: &Secret) -> Result<ReleaseHistory> {
        let Some(data) = secret.data.as_ref().and_then(|d| d.get(HISTORY_DATA_KEY)) else {
            return Ok(ReleaseHistory::new());
        };

        let encoded = String::from_utf8(data.0.clone())
            .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {}", e)))?;
        decode_history(&encoded, self.compression_of(secret))
    }

    /// History held by the Secret, `None` when the Secret does not exist
    pub async fn read(&self, release_name: &str) -> Result<Option<ReleaseHistory>> {
        match self.api().get_opt(release_name).await? {
            Some(secret) => self.parse_secret(&secret).map(Some),
            None => Ok(None),
        }
    }

    /// Create or replace the Secret
    pub async fn write(&self, release_name: &str, history: &ReleaseHistory) -> Result<()> {
        let api = self.api();
        let encoded = encode_history(history, self.compression)?;
        let mut secret = self.build_secret(release_name, &encoded);

        match api.get_opt(release_name).await? {
            Some(existing) => {
                secret.metadata.resource_version = existing.metadata.resource_version;
                api.replace(release_name, &PostParams::default(), &secret)
                    .await?;
            }
            None => {
                api.create(&PostParams::default(), &secret).await?;
            }
        }

        tracing::debug!(
            release = release_name,
            releases = history.len(),
            bytes = encoded.len(),
            "release history saved to secret"
        );
        Ok(())
    }
}

#[async_trait]
impl ReleaseHistoryStore for SecretHistoryStore {
    async fn load(&self, release_name: &str) -> Result<ReleaseHistory> {
        Ok(self.read(release_name).await?.unwrap_or_default())
    }

    async fn save(
        &self,
        release_name: &str,
        history: &ReleaseHistory,
        _prefer_secret: bool,
    ) -> Result<()> {
        self.write(release_name, history).await
    }

    async fn history_objects(&self, release_name: &str) -> Result<Vec<KubernetesResourceId>> {
        let exists = self.api().get_opt(release_name).await?.is_some();
        Ok(exists
            .then(|| KubernetesResourceId::new("Secret", release_name, &self.namespace))
            .into_iter()
            .collect())
    }

    async fn delete(&self, release_name: &str) -> Result<()> {
        match self.api().delete(release_name, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::debug!(release = release_name, "history secret deleted");
                Ok(())
            }
            Err(e) => match KubeError::from(e) {
                e if e.is_not_found() => Ok(()),
                e => Err(e),
            },
        }
    }
}
