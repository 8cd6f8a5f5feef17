//! kdeploy Kube - Kubernetes side of a deployment
//!
//! This crate provides:
//! - **Orchestrator**: apply, dry run, delete, scale and describe through kubectl
//! - **Status checks**: rollout, job and custom resource steady-state detection with event watchers
//! - **Pruning**: deletion of dropped resources and cleanup of stale releases
//! - **History storage**: release history in Secrets or ConfigMaps
//! - **Deploy task**: the end-to-end deployment coordinator
//! - **Execution log renderers**: styled console and JSON lines output

pub mod error;
pub mod explanation;
pub mod kubectl;
pub mod orchestrator;
pub mod pods;
pub mod progress;
pub mod prune;
pub mod retry;
pub mod status;
pub mod storage;
pub mod task;

pub use error::{KubeError, Result};
pub use kubectl::Kubectl;
pub use orchestrator::{Orchestrator, target_instances_for_canary};
pub use pods::{K8sContainer, K8sPod, pod_details, tag_new_pods, track_and_color_labels};
pub use progress::{ConsoleLog, JsonLog};
pub use prune::{arrange_in_deletion_order, cleanup, prune, resources_to_be_pruned_in_order};
pub use retry::RetryPolicy;
pub use status::{StatusChecker, SteadyState, SteadyStateCheck};
pub use storage::{
    CompressionMethod, ConfigMapHistoryStore, KubeHistoryStore, MockHistoryStore,
    ReleaseHistoryStore, SecretHistoryStore, fetch_all_resources_for_release,
};
pub use task::{DeployRequest, DeployResponse, DeployTask, prepare_resources};
