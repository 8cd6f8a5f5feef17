//! Snapshots of the running pods of a release

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kdeploy_core::annotations::labels;
use kube::Client;
use kube::api::{Api, ListParams};
use serde::{Deserialize, Serialize};

use crate::error::{KubeError, Result};

const LIST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sContainer {
    pub container_id: String,
    pub name: String,
    pub image: String,
}

/// Read-only view of one running pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sPod {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub release_name: String,
    pub pod_ip: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub containers: Vec<K8sContainer>,
    /// Created by the current deployment
    #[serde(default)]
    pub new_pod: bool,
}

impl K8sPod {
    pub fn from_pod(pod: &Pod, release_name: &str) -> Self {
        let metadata = &pod.metadata;
        let status = pod.status.as_ref();
        let containers = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|c| K8sContainer {
                        container_id: c.container_id.clone().unwrap_or_default(),
                        name: c.name.clone(),
                        image: c.image.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            uid: metadata.uid.clone().unwrap_or_default(),
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata.namespace.clone().unwrap_or_default(),
            release_name: release_name.to_string(),
            pod_ip: status.and_then(|s| s.pod_ip.clone()).unwrap_or_default(),
            labels: metadata.labels.clone().unwrap_or_default(),
            containers,
            new_pod: false,
        }
    }
}

/// Running and not terminating
fn is_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Running")
}

/// `release=<name>` plus the extra labels, as a label selector
pub fn release_selector(release_name: &str, extra_labels: &BTreeMap<String, String>) -> String {
    let mut selector = BTreeMap::new();
    selector.insert(labels::RELEASE.to_string(), release_name.to_string());
    selector.extend(extra_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Running pods of a release matching the extra labels
pub async fn pod_details(
    client: &Client,
    namespace: &str,
    release_name: &str,
    extra_labels: &BTreeMap<String, String>,
) -> Result<Vec<K8sPod>> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&release_selector(release_name, extra_labels));

    let list = tokio::time::timeout(LIST_TIMEOUT, api.list(&params))
        .await
        .map_err(|_| {
            KubeError::Timeout(format!(
                "listing pods of release {release_name} in namespace {namespace}"
            ))
        })??;

    Ok(list
        .items
        .iter()
        .filter(|pod| is_running(pod))
        .map(|pod| K8sPod::from_pod(pod, release_name))
        .collect())
}

/// Extra pod labels selecting one canary/primary track and/or one blue/green color
pub fn track_and_color_labels(track: Option<&str>, color: Option<&str>) -> BTreeMap<String, String> {
    let mut extra = BTreeMap::new();
    if let Some(track) = track {
        extra.insert(labels::TRACK.to_string(), track.to_string());
    }
    if let Some(color) = color {
        extra.insert(labels::COLOR.to_string(), color.to_string());
    }
    extra
}

/// Flag the pods that did not exist before the deployment
pub fn tag_new_pods(mut new_pods: Vec<K8sPod>, existing_pods: &[K8sPod]) -> Vec<K8sPod> {
    let existing: HashSet<&str> = existing_pods.iter().map(|p| p.name.as_str()).collect();
    for pod in &mut new_pods {
        pod.new_pod = !existing.contains(pod.name.as_str());
    }
    new_pods
}
