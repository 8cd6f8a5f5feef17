//! Kubernetes resource model
//!
//! A [`KubernetesResource`] is one YAML document of a rendered manifest. Its
//! [`KubernetesResourceId`] is the identity used by every cluster operation,
//! by the release history and by pruning.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::annotations::{self, kdeploy, kubernetes};
use crate::error::{CoreError, Result};
use crate::kind::{self, ResourceCategory};

/// Identity of a resource in the cluster
///
/// Two ids are equal when kind, name and namespace match; the `versioned`
/// flag does not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesResourceId {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub versioned: bool,
}

impl KubernetesResourceId {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            versioned: false,
        }
    }

    /// Builder-style setter for the versioned flag
    pub fn versioned(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }

    /// `kind/name`, the resource reference understood by kubectl
    pub fn kind_name_ref(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    /// `namespace/kind/name`, without the namespace part for cluster-scoped ids
    pub fn identifier(&self) -> String {
        if self.namespace.is_empty() {
            self.kind_name_ref()
        } else {
            format!("{}/{}/{}", self.namespace, self.kind, self.name)
        }
    }

    pub fn category(&self) -> ResourceCategory {
        ResourceCategory::from_kind(&self.kind)
    }
}

impl PartialEq for KubernetesResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.name == other.name && self.namespace == other.namespace
    }
}

impl Eq for KubernetesResourceId {}

impl Hash for KubernetesResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.name.hash(state);
        self.namespace.hash(state);
    }
}

impl fmt::Display for KubernetesResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// One parsed manifest document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesResource {
    pub resource_id: KubernetesResourceId,
    /// Raw YAML of the document
    pub spec: String,
    /// `metadata.annotations`
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl KubernetesResource {
    /// Parse a single YAML document
    pub fn from_yaml(spec: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(spec)?;
        Self::from_value(spec.to_string(), &value)
    }

    pub(crate) fn from_value(spec: String, value: &Value) -> Result<Self> {
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MissingField {
                field: "kind".to_string(),
            })?;

        let metadata = value.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MissingField {
                field: "metadata.name".to_string(),
            })?;
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let annotations: BTreeMap<String, String> = metadata
            .and_then(|m| m.get("annotations"))
            .and_then(Value::as_mapping)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| {
                        let key = k.as_str()?;
                        let value = match v {
                            Value::String(s) => s.clone(),
                            Value::Bool(b) => b.to_string(),
                            Value::Number(n) => n.to_string(),
                            _ => return None,
                        };
                        Some((key.to_string(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let versioned = matches!(kind, "ConfigMap" | "Secret")
            && !annotations::is_true(&annotations, kdeploy::SKIP_VERSIONING);

        Ok(Self {
            resource_id: KubernetesResourceId::new(kind, name, namespace).versioned(versioned),
            spec,
            annotations,
        })
    }

    pub fn kind(&self) -> &str {
        &self.resource_id.kind
    }

    pub fn name(&self) -> &str {
        &self.resource_id.name
    }

    pub fn namespace(&self) -> &str {
        &self.resource_id.namespace
    }

    /// Value of a `metadata.annotations` entry
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Custom resource whose steady state is driven by a condition expression
    pub fn is_managed_workload(&self) -> bool {
        annotations::is_true(&self.annotations, kdeploy::MANAGED_WORKLOAD)
    }

    pub fn is_skip_pruning(&self) -> bool {
        annotations::is_true(&self.annotations, kdeploy::SKIP_PRUNING)
    }

    pub fn is_direct_apply(&self) -> bool {
        annotations::is_true(&self.annotations, kdeploy::DIRECT_APPLY)
    }

    pub fn has_change_cause(&self) -> bool {
        self.annotations.contains_key(kubernetes::CHANGE_CAUSE)
    }

    /// Non-empty steady-state condition expression, if any
    pub fn steady_state_condition(&self) -> Option<&str> {
        self.annotation(kdeploy::STEADY_STATE_CONDITION)
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Set `metadata.namespace`, rewriting the spec so the applied YAML carries it
    pub fn set_namespace(&mut self, namespace: &str) -> Result<()> {
        let mut value: Value = serde_yaml::from_str(&self.spec)?;
        let mapping = value
            .as_mapping_mut()
            .ok_or_else(|| CoreError::MissingField {
                field: "metadata".to_string(),
            })?;
        let metadata = mapping
            .entry(Value::from("metadata"))
            .or_insert_with(|| Value::Mapping(Default::default()));
        if let Value::Mapping(meta) = metadata {
            meta.insert(Value::from("namespace"), Value::from(namespace));
        }

        self.spec = serde_yaml::to_string(&value)?;
        self.resource_id.namespace = namespace.to_string();
        Ok(())
    }

    /// Whether namespace defaulting applies to this resource
    pub fn needs_namespace(&self) -> bool {
        self.resource_id.namespace.is_empty() && !kind::is_cluster_scoped(self.kind())
    }
}
