//! Kind-based ordering of Kubernetes resources
//!
//! Resources are applied from the lowest to the highest category so that
//! dependencies (CRDs, namespaces, RBAC, config) exist before the workloads
//! that use them. Deletion walks the same order backwards.

/// Resource category for ordering during apply and delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceCategory {
    /// CustomResourceDefinition - applied first
    Crd = 0,
    /// Namespace - created before namespace-scoped resources
    Namespace = 1,
    /// ResourceQuota, LimitRange
    NamespaceConfig = 2,
    /// ClusterRole, ClusterRoleBinding
    ClusterRbac = 10,
    /// ServiceAccount, Role, RoleBinding
    NamespacedRbac = 11,
    /// ConfigMap, Secret
    Config = 20,
    /// PersistentVolume, PersistentVolumeClaim, StorageClass
    Storage = 21,
    /// Service, Endpoints, Ingress, NetworkPolicy, Route
    Network = 30,
    /// Deployment, StatefulSet, DaemonSet, ReplicaSet, Pod, DeploymentConfig
    Workload = 40,
    /// Job, CronJob
    Batch = 50,
    /// HorizontalPodAutoscaler, PodDisruptionBudget
    Autoscaling = 60,
    /// Everything else, custom resources included
    Other = 100,
}

impl ResourceCategory {
    /// Categorize a resource by its kind
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "CustomResourceDefinition" => Self::Crd,
            "Namespace" => Self::Namespace,
            "ResourceQuota" | "LimitRange" => Self::NamespaceConfig,
            "ClusterRole" | "ClusterRoleBinding" => Self::ClusterRbac,
            "ServiceAccount" | "Role" | "RoleBinding" => Self::NamespacedRbac,
            "ConfigMap" | "Secret" => Self::Config,
            "PersistentVolume" | "PersistentVolumeClaim" | "StorageClass" => Self::Storage,
            "Service" | "Endpoints" | "Ingress" | "IngressClass" | "NetworkPolicy" | "Route" => {
                Self::Network
            }
            "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "Pod"
            | "DeploymentConfig" => Self::Workload,
            "Job" | "CronJob" => Self::Batch,
            "HorizontalPodAutoscaler" | "VerticalPodAutoscaler" | "PodDisruptionBudget" => {
                Self::Autoscaling
            }
            _ => Self::Other,
        }
    }
}

/// Kinds that live outside any namespace and never receive a default one
pub fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "CustomResourceDefinition"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "PersistentVolume"
            | "StorageClass"
            | "IngressClass"
            | "PriorityClass"
    )
}

/// Kinds whose steady state is checked with `rollout status`
pub fn is_rollout_workload(kind: &str) -> bool {
    matches!(
        kind,
        "Deployment" | "StatefulSet" | "DaemonSet" | "DeploymentConfig"
    )
}

/// Stable sort in creation order; ties keep their input order
pub fn sort_in_creation_order<T>(items: &mut [T], kind_of: impl Fn(&T) -> &str) {
    items.sort_by_key(|item| ResourceCategory::from_kind(kind_of(item)));
}

/// Exact reverse of [`sort_in_creation_order`]
pub fn sort_in_deletion_order<T>(items: &mut [T], kind_of: impl Fn(&T) -> &str) {
    sort_in_creation_order(items, kind_of);
    items.reverse();
}
