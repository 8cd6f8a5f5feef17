//! ConfigMap history driver
//!
//! Plain YAML, so the history can be inspected with kubectl. Used when the
//! deployment does not ask for Secret storage and as the read fallback.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kdeploy_core::{KubernetesResourceId, ReleaseHistory};
use kube::Client;
use kube::api::{Api, DeleteParams, PostParams};

use super::{HISTORY_DATA_KEY, ReleaseHistoryStore, storage_labels};
use crate::error::{KubeError, Result};

/// History stored in one ConfigMap per release name
#[derive(Clone)]
pub struct ConfigMapHistoryStore {
    client: Client,
    namespace: String,
}

impl ConfigMapHistoryStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn build_configmap(&self, release_name: &str, yaml: String) -> ConfigMap {
        let mut data = BTreeMap::new();
        data.insert(HISTORY_DATA_KEY.to_string(), yaml);

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(release_name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(storage_labels(release_name)),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    /// History held by the ConfigMap, `None` when the ConfigMap does not exist
    pub async fn read(&self, release_name: &str) -> Result<Option<ReleaseHistory>> {
        let Some(cm) = self.api().get_opt(release_name).await? else {
            return Ok(None);
        };
        let yaml = cm
            .data
            .as_ref()
            .and_then(|d| d.get(HISTORY_DATA_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        Ok(Some(ReleaseHistory::from_yaml(yaml)?))
    }

    /// Create or replace the ConfigMap
    pub async fn write(&self, release_name: &str, history: &ReleaseHistory) -> Result<()> {
        let api = self.api();
        let mut cm = self.build_configmap(release_name, history.to_yaml()?);

        match api.get_opt(release_name).await? {
            Some(existing) => {
                cm.metadata.resource_version = existing.metadata.resource_version;
                api.replace(release_name, &PostParams::default(), &cm).await?;
            }
            None => {
                api.create(&PostParams::default(), &cm).await?;
            }
        }

        tracing::debug!(
            release = release_name,
            releases = history.len(),
            "release history saved to configmap"
        );
        Ok(())
    }
}

#[async_trait]
impl ReleaseHistoryStore for ConfigMapHistoryStore {
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
            .then(|| KubernetesResourceId::new("ConfigMap", release_name, &self.namespace))
            .into_iter()
            .collect())
    }

    async fn delete(&self, release_name: &str) -> Result<()> {
        match self.api().delete(release_name, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::debug!(release = release_name, "history configmap deleted");
                Ok(())
            }
            Err(e) => match KubeError::from(e) {
                e if e.is_not_found() => Ok(()),
                e => Err(e),
            },
        }
    }
}
